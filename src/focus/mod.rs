pub mod controller;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::error::Result;
use crate::llm::LlmClient;
use crate::models::{BrowserPolicy, FocusEventType, FocusMode, FocusSessionEvent, Source};
use crate::storage::Store;
use crate::widget::{self, WidgetState};
use controller::Controller;

const WARN_TIMER: std::time::Duration = std::time::Duration::from_secs(5);
const HEARTBEAT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);
pub const STALE_SESSION_AFTER: chrono::Duration = chrono::Duration::minutes(2);

const BROWSER_APP_CLASSES: &[&str] =
    &["chrome", "safari", "firefox", "arc", "edge", "brave", "opera", "vivaldi"];

/// Whether `app_class` (as reported by the window sampler) names a browser,
/// used by decision step 3.
pub fn is_browser_app_class(app_class: &str) -> bool {
    let lower = app_class.to_lowercase();
    BROWSER_APP_CLASSES.iter().any(|b| lower.contains(b))
}

const ASK_LLM_SYSTEM_PROMPT: &str = "You are a focus-mode gatekeeper. Given the purpose of a \
focus session and a candidate window title, answer with exactly one word: ALLOW or BLOCK. \
Nothing else.";

/// One step of the decision function evaluated on every focus change, per
/// `spec.md` §4.7. Pure given its inputs; the `ask_llm` branch is resolved
/// by the caller via the enforcer's cache before this function is called
/// again with a concrete answer substituted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
    AskLlm,
}

fn matches_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| haystack.contains(&n.to_lowercase()))
}

/// Steps 1-5 of the focus decision function. `is_browser` classifies
/// `app_class` as a browser so step 3 can apply site-level rules.
pub fn decide(mode: &FocusMode, app_class: &str, window_title: &str, is_browser: bool) -> Decision {
    if mode.allowed_apps.iter().any(|a| a.eq_ignore_ascii_case(app_class)) {
        return Decision::Allow;
    }
    if mode.blocked_apps.iter().any(|a| a.eq_ignore_ascii_case(app_class)) {
        return Decision::Block;
    }
    if is_browser {
        if matches_any(window_title, &mode.allowed_sites) {
            return Decision::Allow;
        }
        if matches_any(window_title, &mode.blocked_patterns) {
            return Decision::Block;
        }
        return match mode.browser_policy {
            BrowserPolicy::Allow => Decision::Allow,
            BrowserPolicy::Block => Decision::Block,
            BrowserPolicy::AskLlm => Decision::AskLlm,
        };
    }
    if matches_any(window_title, &mode.blocked_patterns) {
        return Decision::Block;
    }
    Decision::Allow
}

/// Strips anything after a `?` (tracking query strings) and collapses
/// whitespace before lowercasing, per `spec.md` §9's design note on
/// avoiding cache thrash from URL parameters embedded in window titles.
fn normalize_title(title: &str) -> String {
    let without_query = title.split('?').next().unwrap_or(title);
    without_query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// A window-focus transition, either polled from the window sampler's
/// latest capture or supplied directly (e.g. in tests).
#[derive(Debug, Clone)]
pub struct FocusEvent {
    pub app_class: String,
    pub window_title: String,
    pub is_browser: bool,
}

/// Runs one active [`FocusMode`] session: consumes focus events, applies
/// the decision function, and drives the warn-then-act timer. One instance
/// per active session, per `spec.md` §4.7 / §5.
pub struct FocusEnforcer {
    store: Arc<Store>,
    llm: Arc<LlmClient>,
    controller: Arc<dyn Controller>,
    widget_path: PathBuf,
    ask_llm_cache: Mutex<HashMap<(String, String), Decision>>,
}

impl FocusEnforcer {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<LlmClient>,
        controller: Arc<dyn Controller>,
        widget_path: PathBuf,
    ) -> Self {
        Self {
            store,
            llm,
            controller,
            widget_path,
            ask_llm_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Rewrites the widget state file from the session's current DB row
    /// plus the decision/action that just occurred, per `spec.md` §6's
    /// documented live fields. Called from every branch of
    /// [`Self::handle_event`]/[`Self::act`] so `blocks_count`,
    /// `last_decision`, and `last_action` never go stale.
    fn refresh_widget(&self, mode_name: &str, last_decision: Option<&str>, last_action: Option<&str>) {
        let session = match self.store.active_session(STALE_SESSION_AFTER) {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                log::warn!("focus enforcer failed to read active session for widget refresh: {e}");
                return;
            }
        };
        let elapsed_secs = (chrono::Utc::now() - session.started_at).num_seconds().max(0) as u64;
        let state = WidgetState {
            active: true,
            mode_name: Some(mode_name.to_string()),
            elapsed_secs,
            blocks_count: session.blocks_count,
            last_decision: last_decision.map(str::to_string),
            last_action: last_action.map(str::to_string),
        };
        if let Err(e) = widget::write_widget_state(&self.widget_path, &state) {
            log::warn!("failed to update focus widget state: {e}");
        }
    }

    /// Spawns the session's polling loop plus its heartbeat task. Returns
    /// when `stop_rx` fires or the session is reaped/ended elsewhere. Polls
    /// the store for the window sampler's latest capture every second
    /// rather than requiring a dedicated event bus, mirroring the
    /// ticker-plus-store-read shape the summarizer and insight engine use.
    pub fn spawn(self: Arc<Self>, session_id: String, mode: FocusMode, mut stop_rx: watch::Receiver<bool>) {
        let heartbeat_store = self.store.clone();
        let heartbeat_session = session_id.clone();
        let mut heartbeat_stop = stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat_store.heartbeat(&heartbeat_session) {
                            log::warn!("focus session heartbeat failed: {e}");
                        }
                    }
                    _ = heartbeat_stop.changed() => {
                        if *heartbeat_stop.borrow() { break; }
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut last_seen: Option<(String, String)> = None;
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.store.get_last_for_source(Source::Window) {
                            Ok(Some(capture)) => {
                                let app_class = capture.metadata.get("app_class").cloned().unwrap_or_default();
                                let window_title = capture.metadata.get("title").cloned().unwrap_or_default();
                                let key = (app_class.clone(), window_title.clone());
                                if last_seen.as_ref() != Some(&key) {
                                    last_seen = Some(key);
                                    let event = FocusEvent {
                                        is_browser: is_browser_app_class(&app_class),
                                        app_class,
                                        window_title,
                                    };
                                    if let Err(e) = self.handle_event(&session_id, &mode, event, &mut stop_rx).await {
                                        log::warn!("focus enforcer failed to handle event: {e}");
                                    }
                                }
                            }
                            Ok(None) => {}
                            Err(e) => log::warn!("focus enforcer failed to read latest window capture: {e}"),
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() { break; }
                    }
                }
            }
        });
    }

    async fn handle_event(
        &self,
        session_id: &str,
        mode: &FocusMode,
        event: FocusEvent,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut decision = decide(mode, &event.app_class, &event.window_title, event.is_browser);
        let normalized = normalize_title(&event.window_title);

        if decision == Decision::AskLlm {
            let key = (mode.id.clone(), normalized.clone());
            let cached = self.ask_llm_cache.lock().await.get(&key).copied();
            decision = match cached {
                Some(d) => d,
                None => {
                    let resolved = self.ask_llm(mode, &event.window_title).await;
                    self.ask_llm_cache.lock().await.insert(key, resolved);
                    self.store.append_session_event(&FocusSessionEvent {
                        session_id: session_id.to_string(),
                        event_type: FocusEventType::LlmCheck,
                        app_class: event.app_class.clone(),
                        window_title: event.window_title.clone(),
                        llm_decision: Some(format!("{resolved:?}")),
                        reason: None,
                        timestamp: chrono::Utc::now(),
                    })?;
                    resolved
                }
            };
        }

        self.store.append_session_event(&FocusSessionEvent {
            session_id: session_id.to_string(),
            event_type: FocusEventType::Switch,
            app_class: event.app_class.clone(),
            window_title: event.window_title.clone(),
            llm_decision: None,
            reason: None,
            timestamp: chrono::Utc::now(),
        })?;

        match decision {
            Decision::Allow => {
                self.store.append_session_event(&FocusSessionEvent {
                    session_id: session_id.to_string(),
                    event_type: FocusEventType::Allow,
                    app_class: event.app_class,
                    window_title: event.window_title,
                    llm_decision: None,
                    reason: None,
                    timestamp: chrono::Utc::now(),
                })?;
                self.refresh_widget(&mode.name, Some("allow"), None);
                Ok(())
            }
            Decision::Block | Decision::AskLlm => {
                self.warn_then_act(session_id, mode, event, stop_rx).await
            }
        }
    }

    async fn ask_llm(&self, mode: &FocusMode, window_title: &str) -> Decision {
        let prompt = format!(
            "Focus session purpose: {}\nCandidate window title: {}",
            mode.purpose, window_title
        );
        match self.llm.complete_text(ASK_LLM_SYSTEM_PROMPT, &prompt).await {
            Ok(text) if text.trim().eq_ignore_ascii_case("allow") => Decision::Allow,
            Ok(text) if text.trim().eq_ignore_ascii_case("block") => Decision::Block,
            Ok(other) => {
                log::warn!("ask_llm returned an unrecognized verdict {other:?}; defaulting to block");
                Decision::Block
            }
            Err(e) => {
                log::warn!("ask_llm call failed, defaulting to block: {e}");
                Decision::Block
            }
        }
    }

    /// Warns, then races the close action against the warn timer AND the
    /// user returning to an allowed window, per `spec.md` §4.7's S6
    /// scenario: switching back to an allowed app within the warn window
    /// must cancel the close action, not merely delay it.
    async fn warn_then_act(
        &self,
        session_id: &str,
        mode: &FocusMode,
        event: FocusEvent,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        self.store.append_session_event(&FocusSessionEvent {
            session_id: session_id.to_string(),
            event_type: FocusEventType::Warn,
            app_class: event.app_class.clone(),
            window_title: event.window_title.clone(),
            llm_decision: None,
            reason: None,
            timestamp: chrono::Utc::now(),
        })?;
        self.refresh_widget(&mode.name, Some("warn"), None);

        let deadline = tokio::time::Instant::now() + WARN_TIMER;
        let mut recheck = tokio::time::interval(POLL_INTERVAL);
        recheck.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return self.act(session_id, mode, &event).await;
                }
                _ = recheck.tick() => {
                    match self.store.get_last_for_source(Source::Window) {
                        Ok(Some(capture)) => {
                            let app_class = capture.metadata.get("app_class").cloned().unwrap_or_default();
                            let window_title = capture.metadata.get("title").cloned().unwrap_or_default();
                            if app_class == event.app_class && window_title == event.window_title {
                                continue;
                            }
                            let is_browser = is_browser_app_class(&app_class);
                            if decide(mode, &app_class, &window_title, is_browser) == Decision::Allow {
                                self.store.append_session_event(&FocusSessionEvent {
                                    session_id: session_id.to_string(),
                                    event_type: FocusEventType::Allow,
                                    app_class,
                                    window_title,
                                    llm_decision: None,
                                    reason: Some("cancelled warn timer: user returned to an allowed window".into()),
                                    timestamp: chrono::Utc::now(),
                                })?;
                                self.refresh_widget(&mode.name, Some("allow"), None);
                                return Ok(());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => log::warn!("focus enforcer failed to re-check window during warn timer: {e}"),
                    }
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn act(&self, session_id: &str, mode: &FocusMode, event: &FocusEvent) -> Result<()> {
        let result = if event.is_browser {
            self.controller.close_tab()
        } else {
            self.controller.close_window()
        };
        let action_label = if event.is_browser { "close_tab" } else { "close_window" };
        if let Err(e) = result {
            log::warn!("focus controller action failed: {e}");
        }
        self.store.increment_blocks(session_id)?;
        self.store.append_session_event(&FocusSessionEvent {
            session_id: session_id.to_string(),
            event_type: FocusEventType::Block,
            app_class: event.app_class.clone(),
            window_title: event.window_title.clone(),
            llm_decision: None,
            reason: None,
            timestamp: chrono::Utc::now(),
        })?;
        self.refresh_widget(&mode.name, Some("block"), Some(action_label));
        Ok(())
    }
}

/// Ends sessions whose heartbeat is older than [`STALE_SESSION_AFTER`],
/// per `spec.md` §4.7's crash-recovery note. Intended to run on its own
/// timer alongside the enforcer tasks.
pub fn reap_stale_sessions(store: &Store) -> Result<Vec<String>> {
    store.reap_stale_sessions(STALE_SESSION_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(browser_policy: BrowserPolicy) -> FocusMode {
        FocusMode {
            id: "deep-work".into(),
            name: "Deep Work".into(),
            purpose: "Shipping a feature without distraction".into(),
            allowed_apps: vec!["zed".into()],
            blocked_apps: vec!["steam".into()],
            blocked_patterns: vec!["reddit".into()],
            allowed_sites: vec!["github.com".into()],
            browser_policy,
            duration_minutes: 60,
        }
    }

    #[test]
    fn allowed_app_wins_immediately() {
        let m = mode(BrowserPolicy::Block);
        assert_eq!(decide(&m, "zed", "main.rs", false), Decision::Allow);
    }

    #[test]
    fn blocked_app_wins_over_everything_else() {
        let m = mode(BrowserPolicy::Allow);
        assert_eq!(decide(&m, "steam", "Library", false), Decision::Block);
    }

    #[test]
    fn browser_allowed_site_overrides_block_policy() {
        let m = mode(BrowserPolicy::Block);
        assert_eq!(decide(&m, "chrome", "octocat/hello - github.com", true), Decision::Allow);
    }

    #[test]
    fn browser_blocked_pattern_overrides_allow_policy() {
        let m = mode(BrowserPolicy::Allow);
        assert_eq!(decide(&m, "chrome", "r/all - reddit", true), Decision::Block);
    }

    #[test]
    fn browser_falls_back_to_browser_policy() {
        let m = mode(BrowserPolicy::AskLlm);
        assert_eq!(decide(&m, "chrome", "some unrelated site", true), Decision::AskLlm);
    }

    #[test]
    fn non_browser_blocked_pattern_blocks() {
        let m = mode(BrowserPolicy::Allow);
        assert_eq!(decide(&m, "notes", "reddit thread draft", false), Decision::Block);
    }

    #[test]
    fn default_is_permissive() {
        let m = mode(BrowserPolicy::Allow);
        assert_eq!(decide(&m, "zoom", "Team standup", false), Decision::Allow);
    }

    #[test]
    fn recognizes_common_browsers() {
        assert!(is_browser_app_class("Google Chrome"));
        assert!(is_browser_app_class("firefox"));
        assert!(!is_browser_app_class("Visual Studio Code"));
    }

    #[test]
    fn normalize_title_strips_query_and_collapses_whitespace() {
        assert_eq!(
            normalize_title("  Example Page?utm_source=x   Title  "),
            "example page"
        );
    }

    #[derive(Default)]
    struct FakeController {
        close_tab_calls: std::sync::atomic::AtomicUsize,
        close_window_calls: std::sync::atomic::AtomicUsize,
    }

    impl Controller for FakeController {
        fn close_tab(&self) -> anyhow::Result<()> {
            self.close_tab_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }

        fn close_window(&self) -> anyhow::Result<()> {
            self.close_window_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
    }

    /// Reproduces `spec.md` §4.7's S6 scenario: a blocked window triggers
    /// the warn timer, but the user switches to an allowed window before it
    /// elapses, so the close action must never fire.
    #[tokio::test(start_paused = true)]
    async fn returning_to_an_allowed_window_cancels_the_close_action() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let llm = Arc::new(LlmClient::new("", "test-model", "http://localhost/unused"));
        let controller = Arc::new(FakeController::default());
        let dir = tempfile::tempdir().unwrap();
        let widget_path = dir.path().join("widget.json");

        let enforcer = Arc::new(FocusEnforcer::new(store.clone(), llm, controller.clone(), widget_path));
        let m = mode(BrowserPolicy::Allow);
        let session = store.start_session(&m.id, m.duration_minutes).unwrap();

        let (_stop_tx, mut stop_rx) = watch::channel(false);
        let blocked_event = FocusEvent {
            app_class: "steam".into(),
            window_title: "Library".into(),
            is_browser: false,
        };

        let task_enforcer = enforcer.clone();
        let task_mode = m.clone();
        let session_id = session.id.clone();
        let handle = tokio::spawn(async move {
            task_enforcer
                .handle_event(&session_id, &task_mode, blocked_event, &mut stop_rx)
                .await
        });

        // Give the warn event a moment to persist, then simulate the user
        // switching back to an allowed app well before WARN_TIMER elapses.
        tokio::time::advance(std::time::Duration::from_millis(100)).await;
        store
            .insert_capture(
                &crate::models::NewCapture::new(Source::Window)
                    .with_meta("app_class", "zed")
                    .with_meta("title", "main.rs"),
            )
            .unwrap();
        tokio::time::advance(POLL_INTERVAL + std::time::Duration::from_millis(100)).await;

        handle.await.unwrap().unwrap();

        assert_eq!(controller.close_tab_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(controller.close_window_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(
            store.active_session(STALE_SESSION_AFTER).unwrap().unwrap().blocks_count,
            0
        );
    }

    /// Sibling of the above: no intervening allowed window means the warn
    /// timer elapses and the close action fires exactly once.
    #[tokio::test(start_paused = true)]
    async fn warn_timer_elapsing_without_return_triggers_the_close_action() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let llm = Arc::new(LlmClient::new("", "test-model", "http://localhost/unused"));
        let controller = Arc::new(FakeController::default());
        let dir = tempfile::tempdir().unwrap();
        let widget_path = dir.path().join("widget.json");

        let enforcer = Arc::new(FocusEnforcer::new(store.clone(), llm, controller.clone(), widget_path));
        let m = mode(BrowserPolicy::Allow);
        let session = store.start_session(&m.id, m.duration_minutes).unwrap();

        let (_stop_tx, mut stop_rx) = watch::channel(false);
        let blocked_event = FocusEvent {
            app_class: "steam".into(),
            window_title: "Library".into(),
            is_browser: false,
        };

        let task_enforcer = enforcer.clone();
        let task_mode = m.clone();
        let session_id = session.id.clone();
        let handle = tokio::spawn(async move {
            task_enforcer
                .handle_event(&session_id, &task_mode, blocked_event, &mut stop_rx)
                .await
        });

        tokio::time::advance(WARN_TIMER + std::time::Duration::from_secs(1)).await;
        handle.await.unwrap().unwrap();

        assert_eq!(controller.close_window_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(
            store.active_session(STALE_SESSION_AFTER).unwrap().unwrap().blocks_count,
            1
        );
    }
}
