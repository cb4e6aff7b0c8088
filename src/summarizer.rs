use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Local, TimeZone, Timelike, Utc};

use crate::error::Result;
use crate::llm::LlmClient;
use crate::models::{Capture, Source, Summary, SummaryType};
use crate::storage::Store;

const HOURLY_LOOKBACK_HOURS: i64 = 12;
const HOURLY_CADENCE: std::time::Duration = std::time::Duration::from_secs(30 * 60);
const DAILY_CADENCE: std::time::Duration = std::time::Duration::from_secs(60 * 60);

const HOURLY_SYSTEM_PROMPT: &str =
    "Summarize this hour of computer activity in 1-2 sentences, at most 50 words. \
No markdown, no preamble.";
const DAILY_SYSTEM_PROMPT: &str =
    "Summarize this day of computer activity in a single paragraph of at most 100 words. \
No markdown, no preamble.";

/// Hierarchical memory compactor: raw captures become hourly summaries,
/// hourly summaries become daily summaries, per `spec.md` §4.5. Both
/// directions gate on `SummaryExists` so reruns are idempotent and a
/// transient LLM failure only skips the current bucket.
pub struct Summarizer {
    store: Arc<Store>,
    llm: Arc<LlmClient>,
}

impl Summarizer {
    pub fn new(store: Arc<Store>, llm: Arc<LlmClient>) -> Self {
        Self { store, llm }
    }

    pub fn spawn(self: Arc<Self>, mut stop_rx: tokio::sync::watch::Receiver<bool>) {
        let hourly = self.clone();
        let mut hourly_stop = stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HOURLY_CADENCE);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = hourly.summarize_recent_hours().await {
                            log::warn!("hourly summarizer pass failed: {e}");
                        }
                    }
                    _ = hourly_stop.changed() => {
                        if *hourly_stop.borrow() { break; }
                    }
                }
            }
        });

        let daily = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DAILY_CADENCE);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = daily.summarize_yesterday().await {
                            log::warn!("daily summarizer pass failed: {e}");
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() { break; }
                    }
                }
            }
        });
    }

    /// Attempt to summarize every completed hour within the last
    /// [`HOURLY_LOOKBACK_HOURS`] hours that lacks a summary.
    pub async fn summarize_recent_hours(&self) -> Result<usize> {
        let now = Utc::now();
        let current_hour_start = now
            .date_naive()
            .and_hms_opt(now.hour(), 0, 0)
            .unwrap()
            .and_utc();

        let mut summarized = 0;
        for i in 1..=HOURLY_LOOKBACK_HOURS {
            let hour_start = current_hour_start - Duration::hours(i);
            let hour_end = hour_start + Duration::hours(1);
            if self.store.summary_exists(SummaryType::Hourly, hour_start)? {
                continue;
            }
            match self.summarize_hour(hour_start, hour_end).await {
                Ok(true) => summarized += 1,
                Ok(false) => {}
                Err(e) => log::warn!("hourly summary for {hour_start} failed, will retry: {e}"),
            }
        }
        Ok(summarized)
    }

    async fn summarize_hour(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let captures = self.store.query_captures_by_range(start, end, None)?;
        if captures.is_empty() {
            return Ok(false);
        }

        let context = build_activity_context(&captures);
        let content = self.llm.complete_text(HOURLY_SYSTEM_PROMPT, &context).await?;
        let apps = unique_apps(&captures).join(",");

        self.store.upsert_summary(&Summary {
            summary_type: SummaryType::Hourly,
            start_time: start,
            end_time: end,
            content,
            apps,
            tokens: approx_tokens(&context),
        })?;
        Ok(true)
    }

    /// Attempt to summarize yesterday at the daily level if absent.
    pub async fn summarize_yesterday(&self) -> Result<bool> {
        let today_start = Local::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_local_timezone(Local)
            .unwrap()
            .with_timezone(&Utc);
        let day_start = today_start - Duration::days(1);
        let day_end = today_start;

        if self.store.summary_exists(SummaryType::Daily, day_start)? {
            return Ok(false);
        }

        let hourly = self
            .store
            .summaries_by_range(SummaryType::Hourly, day_start, day_end)?;

        let (context, apps) = if !hourly.is_empty() {
            let context = hourly
                .iter()
                .map(|s| format!("[{}] {}", s.start_time.with_timezone(&Local).format("%H:%M"), s.content))
                .collect::<Vec<_>>()
                .join("\n");
            let apps: HashSet<String> = hourly
                .iter()
                .flat_map(|s| s.apps.split(',').map(|a| a.to_string()))
                .filter(|a| !a.is_empty())
                .collect();
            (context, apps.into_iter().collect::<Vec<_>>().join(","))
        } else {
            let captures = self.store.query_captures_by_range(day_start, day_end, None)?;
            if captures.is_empty() {
                return Ok(false);
            }
            (build_activity_context(&captures), unique_apps(&captures).join(","))
        };

        let content = self.llm.complete_text(DAILY_SYSTEM_PROMPT, &context).await?;
        self.store.upsert_summary(&Summary {
            summary_type: SummaryType::Daily,
            start_time: day_start,
            end_time: day_end,
            content,
            apps,
            tokens: approx_tokens(&context),
        })?;
        Ok(true)
    }
}

fn unique_apps(captures: &[Capture]) -> Vec<String> {
    let set: HashSet<String> = captures
        .iter()
        .filter_map(|c| c.metadata.get("app_class").cloned())
        .collect();
    let mut apps: Vec<String> = set.into_iter().collect();
    apps.sort();
    apps
}

/// Groups captures by source into the intermediate "activity context" named
/// in `spec.md` §4.5 step 3: unique apps, up to 5 sampled screen OCR texts,
/// up to 3 clipboard excerpts, repo names, stress-elevation count.
fn build_activity_context(captures: &[Capture]) -> String {
    let apps = unique_apps(captures);

    let screen_texts: Vec<&str> = captures
        .iter()
        .filter(|c| c.source == Source::Screen)
        .filter_map(|c| c.text_data.as_deref())
        .filter(|t| !t.is_empty())
        .take(5)
        .collect();

    let clipboard_excerpts: Vec<&str> = captures
        .iter()
        .filter(|c| c.source == Source::Clipboard)
        .filter_map(|c| c.text_data.as_deref())
        .take(3)
        .collect();

    let repos: HashSet<&str> = captures
        .iter()
        .filter(|c| c.source == Source::Git)
        .filter_map(|c| c.metadata.get("repo").map(|s| s.as_str()))
        .collect();

    let stress_elevations = captures
        .iter()
        .filter(|c| c.source == Source::Biometrics)
        .filter(|c| c.metadata.get("stress_level").map(|l| l != "low").unwrap_or(false))
        .count();

    let mut out = String::new();
    out.push_str(&format!("Apps: {}\n", apps.join(", ")));
    if !screen_texts.is_empty() {
        out.push_str("Screen activity:\n");
        for text in &screen_texts {
            out.push_str(&format!("- {}\n", text));
        }
    }
    if !clipboard_excerpts.is_empty() {
        out.push_str("Clipboard:\n");
        for text in &clipboard_excerpts {
            out.push_str(&format!("- {}\n", text));
        }
    }
    if !repos.is_empty() {
        out.push_str(&format!("Repos: {}\n", repos.into_iter().collect::<Vec<_>>().join(", ")));
    }
    out.push_str(&format!("Stress elevations: {}\n", stress_elevations));
    out
}

fn approx_tokens(text: &str) -> u32 {
    (text.len() / 4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewCapture;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn context_groups_by_source() {
        let mut window = NewCapture::new(Source::Window);
        window.metadata.insert("app_class".into(), "vscode".into());
        let screen = NewCapture::new(Source::Screen).with_text("editing main.rs");
        let clipboard = NewCapture::new(Source::Clipboard).with_text("fn main() {}");

        let store = store();
        store.insert_capture(&window).unwrap();
        store.insert_capture(&screen).unwrap();
        store.insert_capture(&clipboard).unwrap();
        let captures = store.get_recent(10).unwrap();

        let context = build_activity_context(&captures);
        assert!(context.contains("vscode"));
        assert!(context.contains("editing main.rs"));
        assert!(context.contains("fn main() {}"));
    }

    #[test]
    fn unique_apps_deduplicates_and_sorts() {
        let mut a = NewCapture::new(Source::Window);
        a.metadata.insert("app_class".into(), "zed".into());
        let mut b = NewCapture::new(Source::Window);
        b.metadata.insert("app_class".into(), "arc".into());
        let mut c = NewCapture::new(Source::Window);
        c.metadata.insert("app_class".into(), "zed".into());

        let store = store();
        store.insert_capture(&a).unwrap();
        store.insert_capture(&b).unwrap();
        store.insert_capture(&c).unwrap();
        let captures = store.get_recent(10).unwrap();

        assert_eq!(unique_apps(&captures), vec!["arc".to_string(), "zed".to_string()]);
    }
}
