use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{MnemosyneError, Result};
use crate::models::{
    BrowserPolicy, Capture, FocusEventType, FocusMode, FocusSession, FocusSessionEvent, Insight,
    NewCapture, NewInsight, Severity, Source, Summary, SummaryType,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS captures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        text_data TEXT,
        raw_data_path TEXT,
        metadata TEXT NOT NULL DEFAULT '{}'
    );
    CREATE INDEX IF NOT EXISTS idx_captures_source_ts ON captures(source, timestamp);
    CREATE INDEX IF NOT EXISTS idx_captures_ts ON captures(timestamp);

    CREATE TABLE IF NOT EXISTS summaries (
        summary_type TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        content TEXT NOT NULL,
        apps TEXT NOT NULL DEFAULT '',
        tokens INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (summary_type, start_time)
    );

    CREATE TABLE IF NOT EXISTS focus_modes (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        purpose TEXT NOT NULL DEFAULT '',
        allowed_apps TEXT NOT NULL DEFAULT '[]',
        blocked_apps TEXT NOT NULL DEFAULT '[]',
        blocked_patterns TEXT NOT NULL DEFAULT '[]',
        allowed_sites TEXT NOT NULL DEFAULT '[]',
        browser_policy TEXT NOT NULL DEFAULT 'allow',
        duration_minutes INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS focus_sessions (
        id TEXT PRIMARY KEY,
        mode_id TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT,
        blocks_count INTEGER NOT NULL DEFAULT 0,
        heartbeat TEXT NOT NULL,
        planned_duration_minutes INTEGER NOT NULL DEFAULT 0,
        actual_duration_minutes INTEGER,
        quit_reason TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_focus_sessions_ended ON focus_sessions(ended_at);

    CREATE TABLE IF NOT EXISTS focus_session_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        app_class TEXT NOT NULL DEFAULT '',
        window_title TEXT NOT NULL DEFAULT '',
        llm_decision TEXT,
        reason TEXT,
        timestamp TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_focus_events_session ON focus_session_events(session_id);

    CREATE TABLE IF NOT EXISTS insights (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        insight_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        trigger_source TEXT NOT NULL DEFAULT '',
        related_captures TEXT NOT NULL DEFAULT '[]',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        range_start TEXT,
        range_end TEXT,
        acknowledged_at TEXT,
        notified_desktop INTEGER NOT NULL DEFAULT 0,
        notified_tui INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_insights_created ON insights(created_at);

    CREATE TABLE IF NOT EXISTS schema_migrations (
        name TEXT PRIMARY KEY,
        applied_at TEXT NOT NULL
    );
";

/// Idempotent `ADD COLUMN` migrations applied after the base schema. Each
/// entry may fail with 'duplicate column name' if already applied; that
/// specific failure is swallowed per `spec.md` §4.1, anything else
/// propagates.
const COLUMN_MIGRATIONS: &[(&str, &str)] = &[
    // placeholder for future additive migrations; kept as a list so new
    // columns can be appended without touching CREATE TABLE statements that
    // existing on-disk databases already ran.
];

/// Single persistent authority for all structured data. All writes are
/// serialized behind the mutex (the logical single writer); reads may run
/// concurrently with each other but still take the same lock here because
/// `rusqlite::Connection` is not `Sync` — WAL journaling is what lets the
/// underlying engine itself serve concurrent readers from other processes/
/// connections if ever opened that way.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MnemosyneError::StorageOpen(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| MnemosyneError::StorageOpen(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MnemosyneError::StorageOpen(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| MnemosyneError::StorageOpen(e.to_string()))?;
        for (_name, ddl) in COLUMN_MIGRATIONS {
            if let Err(e) = conn.execute_batch(ddl) {
                if !e.to_string().to_lowercase().contains("duplicate column") {
                    return Err(MnemosyneError::StorageOpen(e.to_string()));
                }
            }
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(MnemosyneError::Storage)?;
        conn.execute_batch(SCHEMA).map_err(MnemosyneError::Storage)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- captures ----

    pub fn insert_capture(&self, capture: &NewCapture) -> Result<i64> {
        let metadata = serde_json::to_string(&capture.metadata).unwrap_or_else(|_| "{}".to_string());
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO captures (source, timestamp, text_data, raw_data_path, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                capture.source.as_str(),
                capture.timestamp.to_rfc3339(),
                capture.text_data,
                capture.raw_data_path,
                metadata,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_capture(&self, id: i64) -> Result<Option<Capture>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT id, source, timestamp, text_data, raw_data_path, metadata
                 FROM captures WHERE id = ?1",
                params![id],
                row_to_capture,
            )
            .optional()?;
        Ok(result)
    }

    pub fn get_recent(&self, limit: usize) -> Result<Vec<Capture>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source, timestamp, text_data, raw_data_path, metadata
             FROM captures ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_capture)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent capture for a given source — used by samplers to dedup
    /// against the previous tick (e.g. window title unchanged).
    pub fn get_last_for_source(&self, source: Source) -> Result<Option<Capture>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT id, source, timestamp, text_data, raw_data_path, metadata
                 FROM captures WHERE source = ?1 ORDER BY timestamp DESC LIMIT 1",
                params![source.as_str()],
                row_to_capture,
            )
            .optional()?;
        Ok(result)
    }

    /// All captures with `id > since_id`, ascending. Used by the realtime
    /// insight evaluators to pick up where the last poll left off.
    pub fn captures_since_id(&self, since_id: i64) -> Result<Vec<Capture>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source, timestamp, text_data, raw_data_path, metadata
             FROM captures WHERE id > ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![since_id], row_to_capture)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn query_captures_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        source: Option<Source>,
    ) -> Result<Vec<Capture>> {
        let conn = self.conn.lock().unwrap();
        let rows = if let Some(source) = source {
            let mut stmt = conn.prepare(
                "SELECT id, source, timestamp, text_data, raw_data_path, metadata
                 FROM captures WHERE timestamp >= ?1 AND timestamp < ?2 AND source = ?3
                 ORDER BY timestamp ASC",
            )?;
            stmt.query_map(
                params![start.to_rfc3339(), end.to_rfc3339(), source.as_str()],
                row_to_capture,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, source, timestamp, text_data, raw_data_path, metadata
                 FROM captures WHERE timestamp >= ?1 AND timestamp < ?2
                 ORDER BY timestamp ASC",
            )?;
            stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339()], row_to_capture)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    /// Substring match over `text_data` and serialized `metadata`, per
    /// `spec.md` §4.1.
    pub fn search_captures(&self, needle: &str, limit: usize) -> Result<Vec<Capture>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("%{}%", needle.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn.prepare(
            "SELECT id, source, timestamp, text_data, raw_data_path, metadata
             FROM captures
             WHERE (text_data LIKE ?1 ESCAPE '\\' OR metadata LIKE ?1 ESCAPE '\\')
             ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], row_to_capture)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update a capture's text after OCR backfill completes.
    pub fn update_capture_text(&self, id: i64, text: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE captures SET text_data = ?1 WHERE id = ?2",
            params![text, id],
        )?;
        Ok(())
    }

    /// Screen captures with no OCR text yet, whose blob still exists —
    /// candidates for the OCR backfill operation in `spec.md` §4.4.
    pub fn find_ocr_backfill_candidates(&self, limit: usize) -> Result<Vec<Capture>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source, timestamp, text_data, raw_data_path, metadata
             FROM captures
             WHERE source = 'screen' AND (text_data IS NULL OR text_data = '')
               AND raw_data_path IS NOT NULL
             ORDER BY timestamp ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_capture)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- summaries ----

    pub fn summary_exists(&self, summary_type: SummaryType, start_time: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM summaries WHERE summary_type = ?1 AND start_time = ?2",
            params![summary_type.as_str(), start_time.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn upsert_summary(&self, summary: &Summary) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO summaries (summary_type, start_time, end_time, content, apps, tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(summary_type, start_time) DO UPDATE SET
                end_time = excluded.end_time,
                content = excluded.content,
                apps = excluded.apps,
                tokens = excluded.tokens",
            params![
                summary.summary_type.as_str(),
                summary.start_time.to_rfc3339(),
                summary.end_time.to_rfc3339(),
                summary.content,
                summary.apps,
                summary.tokens,
            ],
        )?;
        Ok(())
    }

    pub fn summaries_by_range(
        &self,
        summary_type: SummaryType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Summary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT summary_type, start_time, end_time, content, apps, tokens
             FROM summaries
             WHERE summary_type = ?1 AND start_time >= ?2 AND start_time < ?3
             ORDER BY start_time ASC",
        )?;
        let rows = stmt
            .query_map(
                params![summary_type.as_str(), start.to_rfc3339(), end.to_rfc3339()],
                row_to_summary,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- focus modes ----

    pub fn upsert_focus_mode(&self, mode: &FocusMode) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO focus_modes (id, name, purpose, allowed_apps, blocked_apps, blocked_patterns, allowed_sites, browser_policy, duration_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, purpose = excluded.purpose,
                allowed_apps = excluded.allowed_apps, blocked_apps = excluded.blocked_apps,
                blocked_patterns = excluded.blocked_patterns, allowed_sites = excluded.allowed_sites,
                browser_policy = excluded.browser_policy, duration_minutes = excluded.duration_minutes",
            params![
                mode.id,
                mode.name,
                mode.purpose,
                serde_json::to_string(&mode.allowed_apps).unwrap(),
                serde_json::to_string(&mode.blocked_apps).unwrap(),
                serde_json::to_string(&mode.blocked_patterns).unwrap(),
                serde_json::to_string(&mode.allowed_sites).unwrap(),
                browser_policy_str(mode.browser_policy),
                mode.duration_minutes,
            ],
        )?;
        Ok(())
    }

    pub fn get_focus_mode(&self, id: &str) -> Result<Option<FocusMode>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT id, name, purpose, allowed_apps, blocked_apps, blocked_patterns, allowed_sites, browser_policy, duration_minutes
                 FROM focus_modes WHERE id = ?1",
                params![id],
                row_to_focus_mode,
            )
            .optional()?;
        Ok(result)
    }

    pub fn list_focus_modes(&self) -> Result<Vec<FocusMode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, purpose, allowed_apps, blocked_apps, blocked_patterns, allowed_sites, browser_policy, duration_minutes
             FROM focus_modes ORDER BY name ASC",
        )?;
        let rows = stmt
            .query_map([], row_to_focus_mode)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_focus_mode(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM focus_modes WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ---- focus sessions ----

    pub fn start_session(&self, mode_id: &str, planned_duration_minutes: u32) -> Result<FocusSession> {
        let now = Utc::now();
        let session = FocusSession {
            id: uuid::Uuid::new_v4().to_string(),
            mode_id: mode_id.to_string(),
            started_at: now,
            ended_at: None,
            blocks_count: 0,
            heartbeat: now,
            planned_duration_minutes,
            actual_duration_minutes: None,
            quit_reason: None,
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO focus_sessions (id, mode_id, started_at, ended_at, blocks_count, heartbeat, planned_duration_minutes, actual_duration_minutes, quit_reason)
             VALUES (?1, ?2, ?3, NULL, 0, ?4, ?5, NULL, NULL)",
            params![
                session.id,
                session.mode_id,
                session.started_at.to_rfc3339(),
                session.heartbeat.to_rfc3339(),
                session.planned_duration_minutes,
            ],
        )?;
        Ok(session)
    }

    /// The single active session, if any, whose heartbeat is fresher than
    /// `stale_after`. Enforces the "at most one live session" invariant from
    /// `spec.md` §3 at the query level — callers must not start a second
    /// session while this returns `Some`.
    pub fn active_session(&self, stale_after: chrono::Duration) -> Result<Option<FocusSession>> {
        let threshold = Utc::now() - stale_after;
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT id, mode_id, started_at, ended_at, blocks_count, heartbeat, planned_duration_minutes, actual_duration_minutes, quit_reason
                 FROM focus_sessions WHERE ended_at IS NULL AND heartbeat > ?1
                 ORDER BY started_at DESC LIMIT 1",
                params![threshold.to_rfc3339()],
                row_to_focus_session,
            )
            .optional()?;
        Ok(result)
    }

    pub fn heartbeat(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE focus_sessions SET heartbeat = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(())
    }

    pub fn increment_blocks(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE focus_sessions SET blocks_count = blocks_count + 1 WHERE id = ?1",
            params![session_id],
        )?;
        Ok(())
    }

    pub fn end_session(&self, session_id: &str, quit_reason: Option<&str>) -> Result<()> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        let started_at: String = conn.query_row(
            "SELECT started_at FROM focus_sessions WHERE id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        let started_at = DateTime::parse_from_rfc3339(&started_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(now);
        let actual_minutes = (now - started_at).num_minutes().max(0) as u32;
        conn.execute(
            "UPDATE focus_sessions SET ended_at = ?1, actual_duration_minutes = ?2, quit_reason = ?3 WHERE id = ?4",
            params![now.to_rfc3339(), actual_minutes, quit_reason, session_id],
        )?;
        Ok(())
    }

    /// End any session whose heartbeat is older than `stale_after` without
    /// a matching explicit stop, per the reaper in `spec.md` §4.7/§9.
    pub fn reap_stale_sessions(&self, stale_after: chrono::Duration) -> Result<Vec<String>> {
        let threshold = Utc::now() - stale_after;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM focus_sessions WHERE ended_at IS NULL AND heartbeat <= ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![threshold.to_rfc3339()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for id in &ids {
            conn.execute(
                "UPDATE focus_sessions SET ended_at = ?1, quit_reason = 'abandoned_heartbeat' WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )?;
        }
        Ok(ids)
    }

    pub fn append_session_event(&self, event: &FocusSessionEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO focus_session_events (session_id, event_type, app_class, window_title, llm_decision, reason, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.session_id,
                event.event_type.as_str(),
                event.app_class,
                event.window_title,
                event.llm_decision,
                event.reason,
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn session_events(&self, session_id: &str) -> Result<Vec<FocusSessionEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, event_type, app_class, window_title, llm_decision, reason, timestamp
             FROM focus_session_events WHERE session_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], row_to_session_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ---- insights ----

    pub fn insert_insight(&self, insight: &NewInsight) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let (range_start, range_end) = match insight.time_range {
            Some((s, e)) => (Some(s.to_rfc3339()), Some(e.to_rfc3339())),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO insights (insight_type, severity, title, body, trigger_source, related_captures, metadata, created_at, range_start, range_end, acknowledged_at, notified_desktop, notified_tui)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, 0, 0)",
            params![
                insight.insight_type,
                insight.severity.as_str(),
                insight.title,
                insight.body,
                insight.trigger_source,
                serde_json::to_string(&insight.related_captures).unwrap(),
                serde_json::to_string(&insight.metadata).unwrap(),
                Utc::now().to_rfc3339(),
                range_start,
                range_end,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn mark_notified(&self, id: i64, desktop: bool, tui: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE insights SET notified_desktop = notified_desktop OR ?1, notified_tui = notified_tui OR ?2 WHERE id = ?3",
            params![desktop, tui, id],
        )?;
        Ok(())
    }

    pub fn acknowledge_insight(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE insights SET acknowledged_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn recent_insights(&self, limit: usize) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, insight_type, severity, title, body, trigger_source, related_captures, metadata, created_at, range_start, range_end, acknowledged_at, notified_desktop, notified_tui
             FROM insights ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_insight)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn insights_since(&self, since: DateTime<Utc>) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, insight_type, severity, title, body, trigger_source, related_captures, metadata, created_at, range_start, range_end, acknowledged_at, notified_desktop, notified_tui
             FROM insights WHERE created_at >= ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![since.to_rfc3339()], row_to_insight)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete raw captures and their blobs in `[start, end)`. Per the Open
    /// Question in `spec.md` §9, summaries and insights are left alone.
    pub fn clear_captures_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT raw_data_path FROM captures WHERE timestamp >= ?1 AND timestamp < ?2 AND raw_data_path IS NOT NULL",
        )?;
        let paths: Vec<String> = stmt
            .query_map(params![start.to_rfc3339(), end.to_rfc3339()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        conn.execute(
            "DELETE FROM captures WHERE timestamp >= ?1 AND timestamp < ?2",
            params![start.to_rfc3339(), end.to_rfc3339()],
        )?;
        Ok(paths)
    }
}

fn browser_policy_str(p: BrowserPolicy) -> &'static str {
    match p {
        BrowserPolicy::Allow => "allow",
        BrowserPolicy::Block => "block",
        BrowserPolicy::AskLlm => "ask_llm",
    }
}

fn parse_browser_policy(s: &str) -> BrowserPolicy {
    match s {
        "block" => BrowserPolicy::Block,
        "ask_llm" => BrowserPolicy::AskLlm,
        _ => BrowserPolicy::Allow,
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

fn row_to_capture(row: &rusqlite::Row) -> rusqlite::Result<Capture> {
    let source: String = row.get(1)?;
    let timestamp: String = row.get(2)?;
    let metadata_json: String = row.get(5)?;
    Ok(Capture {
        id: row.get(0)?,
        source: source.parse().unwrap_or(Source::Window),
        timestamp: parse_rfc3339(&timestamp),
        text_data: row.get(3)?,
        raw_data_path: row.get(4)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
    })
}

fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<Summary> {
    let summary_type: String = row.get(0)?;
    let start_time: String = row.get(1)?;
    let end_time: String = row.get(2)?;
    Ok(Summary {
        summary_type: if summary_type == "daily" {
            SummaryType::Daily
        } else {
            SummaryType::Hourly
        },
        start_time: parse_rfc3339(&start_time),
        end_time: parse_rfc3339(&end_time),
        content: row.get(3)?,
        apps: row.get(4)?,
        tokens: row.get(5)?,
    })
}

fn row_to_focus_mode(row: &rusqlite::Row) -> rusqlite::Result<FocusMode> {
    let allowed_apps: String = row.get(3)?;
    let blocked_apps: String = row.get(4)?;
    let blocked_patterns: String = row.get(5)?;
    let allowed_sites: String = row.get(6)?;
    let browser_policy: String = row.get(7)?;
    Ok(FocusMode {
        id: row.get(0)?,
        name: row.get(1)?,
        purpose: row.get(2)?,
        allowed_apps: serde_json::from_str(&allowed_apps).unwrap_or_default(),
        blocked_apps: serde_json::from_str(&blocked_apps).unwrap_or_default(),
        blocked_patterns: serde_json::from_str(&blocked_patterns).unwrap_or_default(),
        allowed_sites: serde_json::from_str(&allowed_sites).unwrap_or_default(),
        browser_policy: parse_browser_policy(&browser_policy),
        duration_minutes: row.get(8)?,
    })
}

fn row_to_focus_session(row: &rusqlite::Row) -> rusqlite::Result<FocusSession> {
    let started_at: String = row.get(2)?;
    let ended_at: Option<String> = row.get(3)?;
    let heartbeat: String = row.get(5)?;
    Ok(FocusSession {
        id: row.get(0)?,
        mode_id: row.get(1)?,
        started_at: parse_rfc3339(&started_at),
        ended_at: ended_at.map(|s| parse_rfc3339(&s)),
        blocks_count: row.get(4)?,
        heartbeat: parse_rfc3339(&heartbeat),
        planned_duration_minutes: row.get(6)?,
        actual_duration_minutes: row.get(7)?,
        quit_reason: row.get(8)?,
    })
}

fn row_to_session_event(row: &rusqlite::Row) -> rusqlite::Result<FocusSessionEvent> {
    let event_type: String = row.get(1)?;
    let timestamp: String = row.get(6)?;
    Ok(FocusSessionEvent {
        session_id: row.get(0)?,
        event_type: match event_type.as_str() {
            "switch" => FocusEventType::Switch,
            "llm_check" => FocusEventType::LlmCheck,
            "allow" => FocusEventType::Allow,
            "warn" => FocusEventType::Warn,
            _ => FocusEventType::Block,
        },
        app_class: row.get(2)?,
        window_title: row.get(3)?,
        llm_decision: row.get(4)?,
        reason: row.get(5)?,
        timestamp: parse_rfc3339(&timestamp),
    })
}

fn row_to_insight(row: &rusqlite::Row) -> rusqlite::Result<Insight> {
    let severity: String = row.get(2)?;
    let related: String = row.get(6)?;
    let metadata: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let range_start: Option<String> = row.get(9)?;
    let range_end: Option<String> = row.get(10)?;
    let acknowledged_at: Option<String> = row.get(11)?;
    Ok(Insight {
        id: row.get(0)?,
        insight_type: row.get(1)?,
        severity: match severity.as_str() {
            "urgent" => Severity::Urgent,
            "warning" => Severity::Warning,
            _ => Severity::Info,
        },
        title: row.get(3)?,
        body: row.get(4)?,
        trigger_source: row.get(5)?,
        related_captures: serde_json::from_str(&related).unwrap_or_default(),
        metadata: serde_json::from_str::<HashMap<String, String>>(&metadata).unwrap_or_default(),
        created_at: parse_rfc3339(&created_at),
        time_range: match (range_start, range_end) {
            (Some(s), Some(e)) => Some((parse_rfc3339(&s), parse_rfc3339(&e))),
            _ => None,
        },
        acknowledged_at: acknowledged_at.map(|s| parse_rfc3339(&s)),
        notified_desktop: row.get(12)?,
        notified_tui: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn round_trips_capture_metadata() {
        let store = store();
        let mut capture = NewCapture::new(Source::Window);
        capture.metadata.insert("app_class".into(), "vscode".into());
        capture.metadata.insert("title".into(), "main.rs".into());
        let id = store.insert_capture(&capture).unwrap();
        let read = store.get_capture(id).unwrap().unwrap();
        assert_eq!(read.metadata.get("app_class").unwrap(), "vscode");
        assert_eq!(read.metadata.get("title").unwrap(), "main.rs");
    }

    #[test]
    fn summary_upsert_is_idempotent() {
        let store = store();
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let summary = Summary {
            summary_type: SummaryType::Hourly,
            start_time: start,
            end_time: end,
            content: "worked on mnemosyne".into(),
            apps: "vscode".into(),
            tokens: 12,
        };
        assert!(!store.summary_exists(SummaryType::Hourly, start).unwrap());
        store.upsert_summary(&summary).unwrap();
        assert!(store.summary_exists(SummaryType::Hourly, start).unwrap());
        let mut updated = summary.clone();
        updated.content = "updated".into();
        store.upsert_summary(&updated).unwrap();
        let rows = store
            .summaries_by_range(SummaryType::Hourly, start - Duration::minutes(1), end + Duration::minutes(1))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "updated");
    }

    #[test]
    fn at_most_one_active_session() {
        let store = store();
        let mode = FocusMode {
            id: "m1".into(),
            name: "deep work".into(),
            purpose: "coding".into(),
            allowed_apps: vec![],
            blocked_apps: vec!["firefox".into()],
            blocked_patterns: vec![],
            allowed_sites: vec![],
            browser_policy: BrowserPolicy::Block,
            duration_minutes: 30,
        };
        store.upsert_focus_mode(&mode).unwrap();
        let session = store.start_session(&mode.id, 30).unwrap();
        assert!(store.active_session(Duration::minutes(2)).unwrap().is_some());
        store.end_session(&session.id, Some("task_completed")).unwrap();
        assert!(store.active_session(Duration::minutes(2)).unwrap().is_none());
    }

    #[test]
    fn reaper_ends_stale_sessions() {
        let store = store();
        let session = store.start_session("m1", 30).unwrap();
        // Force a stale heartbeat by ending the freshness window immediately.
        let reaped = store.reap_stale_sessions(Duration::seconds(-1)).unwrap();
        assert_eq!(reaped, vec![session.id]);
        assert!(store.active_session(Duration::minutes(2)).unwrap().is_none());
    }

    #[test]
    fn search_matches_text_and_metadata() {
        let store = store();
        let mut c = NewCapture::new(Source::Clipboard).with_text("the quick brown fox");
        c.metadata.insert("app_class".into(), "terminal".into());
        store.insert_capture(&c).unwrap();
        assert_eq!(store.search_captures("brown", 10).unwrap().len(), 1);
        assert_eq!(store.search_captures("terminal", 10).unwrap().len(), 1);
        assert_eq!(store.search_captures("nonexistent", 10).unwrap().len(), 0);
    }

    #[test]
    fn clear_leaves_summaries_and_insights() {
        let store = store();
        let start = Utc::now() - Duration::hours(2);
        let end = Utc::now();
        store.insert_capture(&NewCapture::new(Source::Window)).unwrap();
        store
            .upsert_summary(&Summary {
                summary_type: SummaryType::Hourly,
                start_time: start,
                end_time: start + Duration::hours(1),
                content: "x".into(),
                apps: "".into(),
                tokens: 1,
            })
            .unwrap();
        store
            .insert_insight(&NewInsight {
                insight_type: "deep_work".into(),
                severity: Severity::Info,
                title: "t".into(),
                body: "b".into(),
                trigger_source: "rule".into(),
                related_captures: vec![],
                metadata: HashMap::new(),
                time_range: None,
            })
            .unwrap();
        store.clear_captures_in_range(start, end).unwrap();
        assert!(store.get_recent(10).unwrap().is_empty());
        assert_eq!(
            store
                .summaries_by_range(SummaryType::Hourly, start - Duration::minutes(1), end)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.recent_insights(10).unwrap().len(), 1);
    }
}
