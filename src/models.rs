use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag identifying which sampler produced a [`Capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Window,
    Screen,
    Clipboard,
    Git,
    Activity,
    Biometrics,
    Gmail,
    Slack,
    Calendar,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Window => "window",
            Source::Screen => "screen",
            Source::Clipboard => "clipboard",
            Source::Git => "git",
            Source::Activity => "activity",
            Source::Biometrics => "biometrics",
            Source::Gmail => "gmail",
            Source::Slack => "slack",
            Source::Calendar => "calendar",
        }
    }
}

impl std::str::FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "window" => Source::Window,
            "screen" => Source::Screen,
            "clipboard" => Source::Clipboard,
            "git" => Source::Git,
            "activity" => Source::Activity,
            "biometrics" => Source::Biometrics,
            "gmail" => Source::Gmail,
            "slack" => Source::Slack,
            "calendar" => Source::Calendar,
            other => anyhow::bail!("unknown capture source: {other}"),
        })
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic unit produced by every sampler. Immutable after write; once
/// returned to a reader this is a value copy, never a handle back into the
/// store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capture {
    pub id: i64,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    pub text_data: Option<String>,
    pub raw_data_path: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// A capture not yet assigned an id, as produced by a [`crate::samplers::Sampler`].
#[derive(Debug, Clone)]
pub struct NewCapture {
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    pub text_data: Option<String>,
    pub raw_data_path: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl NewCapture {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            timestamp: Utc::now(),
            text_data: None,
            raw_data_path: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_data = Some(text.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_blob(mut self, path: impl Into<String>) -> Self {
        self.raw_data_path = Some(path.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryType {
    Hourly,
    Daily,
}

impl SummaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryType::Hourly => "hourly",
            SummaryType::Daily => "daily",
        }
    }
}

/// A compressed memory aggregate. `(type, start_time)` is unique; an hourly
/// summary's interval is exactly one clock hour, a daily summary's interval
/// is exactly one local calendar day (stored as its UTC-normalized bounds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub summary_type: SummaryType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub content: String,
    pub apps: String,
    pub tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserPolicy {
    Allow,
    Block,
    AskLlm,
}

/// A user-defined focus policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusMode {
    pub id: String,
    pub name: String,
    pub purpose: String,
    pub allowed_apps: Vec<String>,
    pub blocked_apps: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub allowed_sites: Vec<String>,
    pub browser_policy: BrowserPolicy,
    pub duration_minutes: u32,
}

/// One activation of a [`FocusMode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusSession {
    pub id: String,
    pub mode_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub blocks_count: u32,
    pub heartbeat: DateTime<Utc>,
    pub planned_duration_minutes: u32,
    pub actual_duration_minutes: Option<u32>,
    pub quit_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusEventType {
    Switch,
    LlmCheck,
    Allow,
    Warn,
    Block,
}

impl FocusEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FocusEventType::Switch => "switch",
            FocusEventType::LlmCheck => "llm_check",
            FocusEventType::Allow => "allow",
            FocusEventType::Warn => "warn",
            FocusEventType::Block => "block",
        }
    }
}

/// One append-only entry in a session's decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusSessionEvent {
    pub session_id: String,
    pub event_type: FocusEventType,
    pub app_class: String,
    pub window_title: String,
    pub llm_decision: Option<String>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Urgent => "urgent",
        }
    }
}

/// A persisted advisory message produced by a realtime rule or the batch
/// analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: i64,
    pub insight_type: String,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub trigger_source: String,
    pub related_captures: Vec<i64>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub notified_desktop: bool,
    pub notified_tui: bool,
}

/// A new insight not yet assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInsight {
    pub insight_type: String,
    pub severity: Severity,
    pub title: String,
    pub body: String,
    pub trigger_source: String,
    pub related_captures: Vec<i64>,
    pub metadata: HashMap<String, String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// A derived indicator from biometric samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StressSnapshot {
    pub score: f32,
    pub level: StressLevel,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressLevel {
    Low,
    Moderate,
    High,
}

impl StressLevel {
    pub fn from_score(score: f32) -> Self {
        if score >= 70.0 {
            StressLevel::High
        } else if score >= 40.0 {
            StressLevel::Moderate
        } else {
            StressLevel::Low
        }
    }
}
