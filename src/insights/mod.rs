use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{watch, Mutex};

use crate::error::Result;
use crate::llm::LlmClient;
use crate::models::{Capture, NewInsight, Severity, Source};
use crate::notify::Notifier;
use crate::socket::PushSocket;
use crate::storage::Store;

const STRESS_SPIKE_WINDOW: Duration = Duration::minutes(2);
const STRESS_SPIKE_RISE: f32 = 20.0;
const STRESS_SPIKE_FLOOR: f32 = 55.0;
const SUSTAINED_THRESHOLD: f32 = 55.0;
const SUSTAINED_DURATION: Duration = Duration::minutes(10);
const IDLE_RETURN_THRESHOLD: Duration = Duration::minutes(5);
const DEEP_WORK_THRESHOLD: Duration = Duration::minutes(30);
const RAPID_SWITCH_COUNT: usize = 10;
const RAPID_SWITCH_WINDOW: Duration = Duration::minutes(10);
const RAPID_SWITCH_COOLDOWN: Duration = Duration::minutes(30);

const REALTIME_POLL: std::time::Duration = std::time::Duration::from_secs(2);
const DEFAULT_BATCH_INTERVAL_MINUTES: u64 = 30;

const BATCH_SYSTEM_PROMPT: &str = "You analyze a summary of someone's recent computer activity \
and surface 1 to 3 short insights worth their attention. Respond with a strict JSON array and \
nothing else, each element shaped like {\"type\": string, \"title\": string, \"body\": string, \
\"severity\": \"info\"|\"warning\"|\"urgent\"}.";

/// Holds the running state each realtime rule needs across calls, per
/// `spec.md` §4.8. One instance per daemon; `evaluate` is invoked for each
/// newly observed capture and returns zero or more insights to persist.
#[derive(Default)]
struct RealtimeState {
    stress_history: VecDeque<(DateTime<Utc>, f32)>,
    sustained_start: Option<DateTime<Utc>>,
    sustained_emitted: bool,
    idle_since: Option<DateTime<Utc>>,
    last_active_window: Option<(String, String)>,
    current_app: Option<String>,
    app_start: Option<DateTime<Utc>>,
    deep_work_emitted: bool,
    switch_timestamps: VecDeque<DateTime<Utc>>,
    last_rapid_switch_emit: Option<DateTime<Utc>>,
}

impl RealtimeState {
    fn evaluate(&mut self, capture: &Capture) -> Vec<NewInsight> {
        match capture.source {
            Source::Biometrics => self.evaluate_biometrics(capture),
            Source::Activity => self.evaluate_activity(capture),
            Source::Window => self.evaluate_window(capture),
            _ => Vec::new(),
        }
    }

    fn evaluate_biometrics(&mut self, capture: &Capture) -> Vec<NewInsight> {
        let mut out = Vec::new();
        let Some(score) = capture
            .metadata
            .get("stress_score")
            .and_then(|s| s.parse::<f32>().ok())
        else {
            return out;
        };
        let now = capture.timestamp;

        self.stress_history.push_back((now, score));
        while let Some((t, _)) = self.stress_history.front() {
            if now - *t > STRESS_SPIKE_WINDOW {
                self.stress_history.pop_front();
            } else {
                break;
            }
        }

        if score >= STRESS_SPIKE_FLOOR {
            if let Some(min) = self.stress_history.iter().map(|(_, s)| *s).fold(None, |acc: Option<f32>, s| {
                Some(acc.map_or(s, |a| a.min(s)))
            }) {
                if score - min >= STRESS_SPIKE_RISE {
                    out.push(NewInsight {
                        insight_type: "stress_spike".into(),
                        severity: Severity::Urgent,
                        title: "Stress spike detected".into(),
                        body: format!("Stress score rose to {score:.0} within the last 2 minutes."),
                        trigger_source: "biometrics".into(),
                        related_captures: vec![capture.id],
                        metadata: Default::default(),
                        time_range: Some((now - STRESS_SPIKE_WINDOW, now)),
                    });
                }
            }
        }

        if score >= SUSTAINED_THRESHOLD {
            let start = *self.sustained_start.get_or_insert(now);
            if !self.sustained_emitted && now - start >= SUSTAINED_DURATION {
                self.sustained_emitted = true;
                out.push(NewInsight {
                    insight_type: "sustained_stress".into(),
                    severity: Severity::Warning,
                    title: "Sustained elevated stress".into(),
                    body: "Stress has stayed elevated for over 10 minutes.".into(),
                    trigger_source: "biometrics".into(),
                    related_captures: vec![capture.id],
                    metadata: Default::default(),
                    time_range: Some((start, now)),
                });
            }
        } else {
            self.sustained_start = None;
            self.sustained_emitted = false;
        }

        out
    }

    fn evaluate_activity(&mut self, capture: &Capture) -> Vec<NewInsight> {
        let mut out = Vec::new();
        let state = capture.metadata.get("state").map(String::as_str).unwrap_or("");
        let now = capture.timestamp;

        if state == "idle" {
            self.idle_since = Some(now);
        } else if state == "active" {
            if let Some(idle_since) = self.idle_since.take() {
                if now - idle_since >= IDLE_RETURN_THRESHOLD {
                    if let Some((app, title)) = &self.last_active_window {
                        out.push(NewInsight {
                            insight_type: "context_switch".into(),
                            severity: Severity::Info,
                            title: "Welcome back".into(),
                            body: format!("Before stepping away you were in {app} - {title}."),
                            trigger_source: "activity".into(),
                            related_captures: vec![capture.id],
                            metadata: Default::default(),
                            time_range: Some((idle_since, now)),
                        });
                    }
                }
            }
        }
        out
    }

    fn evaluate_window(&mut self, capture: &Capture) -> Vec<NewInsight> {
        let mut out = Vec::new();
        let app = capture.metadata.get("app_class").cloned().unwrap_or_default();
        let title = capture.metadata.get("title").cloned().unwrap_or_default();
        let now = capture.timestamp;

        self.last_active_window = Some((app.clone(), title));

        match &self.current_app {
            Some(current) if *current == app => {}
            _ => {
                if let (Some(prev_app), Some(start)) = (self.current_app.clone(), self.app_start) {
                    if !self.deep_work_emitted && now - start >= DEEP_WORK_THRESHOLD {
                        out.push(NewInsight {
                            insight_type: "deep_work".into(),
                            severity: Severity::Info,
                            title: "Deep work streak".into(),
                            body: format!("You've spent over 30 minutes in {prev_app}."),
                            trigger_source: "window".into(),
                            related_captures: vec![capture.id],
                            metadata: Default::default(),
                            time_range: Some((start, now)),
                        });
                    }
                }
                self.current_app = Some(app);
                self.app_start = Some(now);
                self.deep_work_emitted = false;

                self.switch_timestamps.push_back(now);
                while let Some(t) = self.switch_timestamps.front() {
                    if now - *t > RAPID_SWITCH_WINDOW {
                        self.switch_timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                let cooldown_clear = self
                    .last_rapid_switch_emit
                    .map(|t| now - t >= RAPID_SWITCH_COOLDOWN)
                    .unwrap_or(true);
                if self.switch_timestamps.len() > RAPID_SWITCH_COUNT && cooldown_clear {
                    self.last_rapid_switch_emit = Some(now);
                    out.push(NewInsight {
                        insight_type: "rapid_switching".into(),
                        severity: Severity::Warning,
                        title: "Rapid app switching".into(),
                        body: "You've switched apps more than 10 times in the last 10 minutes.".into(),
                        trigger_source: "window".into(),
                        related_captures: vec![capture.id],
                        metadata: Default::default(),
                        time_range: Some((now - RAPID_SWITCH_WINDOW, now)),
                    });
                }
            }
        }
        out
    }
}

/// Runs the realtime rule set and the periodic batch analyzer described in
/// `spec.md` §4.8.
pub struct InsightEngine {
    store: Arc<Store>,
    llm: Arc<LlmClient>,
    notifier: Arc<dyn Notifier>,
    socket: Option<Arc<PushSocket>>,
    desktop_notifications: bool,
    batch_interval_minutes: u64,
}

impl InsightEngine {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<LlmClient>,
        notifier: Arc<dyn Notifier>,
        socket: Option<Arc<PushSocket>>,
        desktop_notifications: bool,
        batch_interval_minutes: u64,
    ) -> Self {
        Self {
            store,
            llm,
            notifier,
            socket,
            desktop_notifications,
            batch_interval_minutes: if batch_interval_minutes == 0 {
                DEFAULT_BATCH_INTERVAL_MINUTES
            } else {
                batch_interval_minutes
            },
        }
    }

    pub fn spawn(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let realtime = self.clone();
        let mut realtime_stop = stop_rx.clone();
        tokio::spawn(async move {
            let mut state = RealtimeState::default();
            let mut last_id = 0i64;
            let mut ticker = tokio::time::interval(REALTIME_POLL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match realtime.store.captures_since_id(last_id) {
                            Ok(captures) => {
                                for capture in captures {
                                    last_id = last_id.max(capture.id);
                                    for insight in state.evaluate(&capture) {
                                        if let Err(e) = realtime.persist_and_dispatch(insight).await {
                                            log::warn!("failed to persist realtime insight: {e}");
                                        }
                                    }
                                }
                            }
                            Err(e) => log::warn!("realtime insight poll failed: {e}"),
                        }
                    }
                    _ = realtime_stop.changed() => {
                        if *realtime_stop.borrow() { break; }
                    }
                }
            }
        });

        let batch = self;
        tokio::spawn(async move {
            let mut last_run = Utc::now();
            let interval = std::time::Duration::from_secs(batch.batch_interval_minutes * 60);
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let since = last_run;
                        last_run = Utc::now();
                        if let Err(e) = batch.run_batch_pass(since, last_run).await {
                            log::warn!("batch insight pass failed: {e}");
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() { break; }
                    }
                }
            }
        });
    }

    async fn persist_and_dispatch(&self, insight: NewInsight) -> Result<()> {
        let severity = insight.severity;
        let id = self.store.insert_insight(&insight)?;
        self.dispatch(id, &insight.title, &insight.body, severity).await;
        Ok(())
    }

    async fn dispatch(&self, id: i64, title: &str, body: &str, severity: Severity) {
        if let Some(socket) = &self.socket {
            socket
                .broadcast(
                    "insight",
                    serde_json::json!({ "id": id, "title": title, "body": body, "severity": severity.as_str() }),
                )
                .await;
        }
        if self.desktop_notifications && matches!(severity, Severity::Urgent | Severity::Warning) {
            self.notifier.notify(title, body);
            if let Err(e) = self.store.mark_notified(id, true, false) {
                log::warn!("failed to record notification flag: {e}");
            }
        }
    }

    async fn run_batch_pass(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<()> {
        let captures = self.store.query_captures_by_range(since, until, None)?;
        if captures.is_empty() {
            return Ok(());
        }
        let context = build_batch_context(&captures);
        let raw = self.llm.complete_text(BATCH_SYSTEM_PROMPT, &context).await?;
        let insights = match parse_batch_insights(&raw) {
            Some(insights) => insights,
            None => {
                log::warn!("batch analyzer returned unparseable JSON, discarding: {raw:?}");
                return Ok(());
            }
        };
        for parsed in insights {
            let insight = NewInsight {
                insight_type: parsed.kind,
                severity: parsed.severity,
                title: parsed.title,
                body: parsed.body,
                trigger_source: "batch".into(),
                related_captures: Vec::new(),
                metadata: Default::default(),
                time_range: Some((since, until)),
            };
            self.persist_and_dispatch(insight).await?;
        }
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct BatchInsight {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    body: String,
    severity: Severity,
}

/// Extracts the first top-level `[...]` substring and parses it, per
/// `spec.md` §4.8's defensive-parsing requirement: the model may wrap the
/// array in prose or a code fence.
fn parse_batch_insights(raw: &str) -> Option<Vec<BatchInsight>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn build_batch_context(captures: &[Capture]) -> String {
    let apps: std::collections::HashSet<&str> = captures
        .iter()
        .filter_map(|c| c.metadata.get("app_class").map(String::as_str))
        .collect();

    let stress_samples: Vec<&str> = captures
        .iter()
        .filter(|c| c.source == Source::Biometrics)
        .filter_map(|c| c.metadata.get("stress_level").map(String::as_str))
        .collect();

    let screen_lines: Vec<&str> = captures
        .iter()
        .filter(|c| c.source == Source::Screen)
        .filter_map(|c| c.text_data.as_deref())
        .filter(|t| !t.is_empty())
        .take(5)
        .collect();

    let clipboard_snippets: Vec<&str> = captures
        .iter()
        .filter(|c| c.source == Source::Clipboard)
        .filter_map(|c| c.text_data.as_deref())
        .take(3)
        .collect();

    let git_items: Vec<&str> = captures
        .iter()
        .filter(|c| c.source == Source::Git)
        .filter_map(|c| c.text_data.as_deref())
        .take(3)
        .collect();

    let mut out = String::new();
    out.push_str(&format!("Apps: {}\n", apps.into_iter().collect::<Vec<_>>().join(", ")));
    out.push_str(&format!("Stress samples: {}\n", stress_samples.join(", ")));
    if !screen_lines.is_empty() {
        out.push_str("Screen activity:\n");
        for line in &screen_lines {
            out.push_str(&format!("- {line}\n"));
        }
    }
    if !clipboard_snippets.is_empty() {
        out.push_str("Clipboard:\n");
        for snippet in &clipboard_snippets {
            out.push_str(&format!("- {snippet}\n"));
        }
    }
    if !git_items.is_empty() {
        out.push_str("Recent git activity:\n");
        for item in &git_items {
            out.push_str(&format!("- {item}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewCapture;

    fn capture(id: i64, source: Source, ts: DateTime<Utc>, meta: &[(&str, &str)]) -> Capture {
        let mut metadata = std::collections::HashMap::new();
        for (k, v) in meta {
            metadata.insert(k.to_string(), v.to_string());
        }
        Capture {
            id,
            source,
            timestamp: ts,
            text_data: None,
            raw_data_path: None,
            metadata,
        }
    }

    #[test]
    fn stress_spike_fires_on_rapid_rise() {
        let mut state = RealtimeState::default();
        let t0 = Utc::now();
        let low = capture(1, Source::Biometrics, t0, &[("stress_score", "30")]);
        let high = capture(2, Source::Biometrics, t0 + Duration::seconds(30), &[("stress_score", "60")]);

        assert!(state.evaluate(&low).is_empty());
        let insights = state.evaluate(&high);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].insight_type, "stress_spike");
    }

    #[test]
    fn sustained_stress_fires_once_after_ten_minutes() {
        let mut state = RealtimeState::default();
        let t0 = Utc::now();
        for minute in 0..12 {
            let cap = capture(
                minute,
                Source::Biometrics,
                t0 + Duration::minutes(minute),
                &[("stress_score", "60")],
            );
            let insights = state.evaluate(&cap);
            if minute < 10 {
                assert!(insights.iter().all(|i| i.insight_type != "sustained_stress"));
            }
        }
        assert!(state.sustained_emitted);
    }

    #[test]
    fn deep_work_fires_once_per_dwell() {
        let mut state = RealtimeState::default();
        let t0 = Utc::now();
        let first = capture(1, Source::Window, t0, &[("app_class", "zed"), ("title", "main.rs")]);
        let switch_away = capture(
            2,
            Source::Window,
            t0 + Duration::minutes(31),
            &[("app_class", "slack"), ("title", "#general")],
        );
        assert!(state.evaluate(&first).is_empty());
        let insights = state.evaluate(&switch_away);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].insight_type, "deep_work");
    }

    #[test]
    fn context_switch_fires_after_long_idle() {
        let mut state = RealtimeState::default();
        let t0 = Utc::now();
        let window = capture(1, Source::Window, t0, &[("app_class", "zed"), ("title", "main.rs")]);
        let idle = capture(2, Source::Activity, t0 + Duration::minutes(1), &[("state", "idle")]);
        let active = capture(
            3,
            Source::Activity,
            t0 + Duration::minutes(7),
            &[("state", "active")],
        );
        state.evaluate(&window);
        assert!(state.evaluate(&idle).is_empty());
        let insights = state.evaluate(&active);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].insight_type, "context_switch");
        assert!(insights[0].body.contains("zed"));
    }

    #[test]
    fn batch_parser_extracts_array_from_surrounding_prose() {
        let raw = "Sure, here are some insights:\n[{\"type\":\"t\",\"title\":\"T\",\"body\":\"B\",\"severity\":\"info\"}]\nLet me know if you want more.";
        let parsed = parse_batch_insights(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].title, "T");
    }

    #[test]
    fn batch_parser_rejects_garbage() {
        assert!(parse_batch_insights("not json at all").is_none());
    }
}
