mod time_range;

pub use time_range::{parse_time_range, TimeRange};

use std::sync::Arc;

use chrono::{Duration, Local, Utc};

use crate::error::Result;
use crate::llm::{LlmClient, Message};
use crate::models::{Capture, Source, SummaryType};
use crate::ocr::OcrQueue;
use crate::storage::Store;

const MAX_SCREEN_CAPTURES: usize = 10;
const MAX_NON_SCREEN_CAPTURES: usize = 50;
const MAX_CHARS_PER_CAPTURE: usize = 500;
const MAX_CONTEXT_CHARS: usize = 30_000;
const MAX_ON_DEMAND_OCR: usize = 5;
const DETAIL_WINDOW_HOURS: i64 = 2;
const TRUNCATION_MARKER: &str = "[Context truncated to stay within token limits]";

const CHAT_SYSTEM_PROMPT: &str = "You are Mnemosyne, a personal memory assistant. Answer the \
user's question using only the activity context provided below. Respond in strict plain text \
with no markdown formatting.";
const SUMMARIZE_SYSTEM_PROMPT: &str = "You are Mnemosyne, a personal memory assistant. Summarize \
the user's activity over the requested period using only the context provided below. Respond in \
strict plain text with no markdown formatting.";

/// Assembles a token-budgeted context for a natural-language question and
/// streams an LLM answer, per `spec.md` §4.6.
pub struct QueryEngine {
    store: Arc<Store>,
    chat_llm: Arc<LlmClient>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>, chat_llm: Arc<LlmClient>) -> Self {
        Self { store, chat_llm }
    }

    /// Full query path: parse the time range, compose context (with
    /// on-demand OCR), and stream the answer through `on_chunk`.
    pub async fn query<F>(&self, question: &str, ocr: Option<&OcrQueue>, on_chunk: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let range = parse_time_range(question);
        let context = self.compose_context(&range, ocr).await?;
        let user_message = format!("Complete context:\n{context}\n\nUser's question: {question}");
        let messages = vec![
            Message::text("system", CHAT_SYSTEM_PROMPT),
            Message::text("user", user_message),
        ];
        self.chat_llm.stream_chat(messages, on_chunk).await
    }

    /// Identical composition without OCR and with a summarization system
    /// prompt, bounded to the requested duration.
    pub async fn summarize<F>(&self, range: TimeRange, on_chunk: F) -> Result<String>
    where
        F: FnMut(&str) + Send,
    {
        let context = self.compose_context(&range, None).await?;
        let user_message = format!("Complete context:\n{context}");
        let messages = vec![
            Message::text("system", SUMMARIZE_SYSTEM_PROMPT),
            Message::text("user", user_message),
        ];
        self.chat_llm.stream_chat(messages, on_chunk).await
    }

    async fn compose_context(&self, range: &TimeRange, ocr: Option<&OcrQueue>) -> Result<String> {
        let now = Utc::now();
        let (start, end) = match range {
            TimeRange::Bounded { start, end } => (*start, *end),
            TimeRange::Unbounded => (now - Duration::days(3650), now),
        };

        let detail_start = (end - Duration::hours(DETAIL_WINDOW_HOURS)).max(start);
        let mut sections = Vec::new();

        if start < detail_start {
            let summaries = self.older_summaries(start, detail_start)?;
            if !summaries.is_empty() {
                let mut block = String::from("=== Activity Timeline (Compressed) ===\n");
                for (label, content) in summaries {
                    block.push_str(&format!("[{label}] {content}\n"));
                }
                sections.push(block);
            }
        }

        let detail_captures = if matches!(range, TimeRange::Unbounded) {
            self.store.get_recent(100)?
        } else {
            self.store.query_captures_by_range(detail_start, end, None)?
        };
        let detail_block = self.format_detail_window(detail_captures, ocr).await?;
        sections.push(detail_block);

        let mut context = sections.join("\n");
        if context.len() > MAX_CONTEXT_CHARS {
            context.truncate(MAX_CONTEXT_CHARS);
            context.push_str(&format!("\n{TRUNCATION_MARKER}"));
        }
        Ok(context)
    }

    /// Older sub-ranges, hourly preferred, daily fallback.
    fn older_summaries(&self, start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> Result<Vec<(String, String)>> {
        let hourly = self.store.summaries_by_range(SummaryType::Hourly, start, end)?;
        if !hourly.is_empty() {
            return Ok(hourly
                .into_iter()
                .map(|s| (s.start_time.with_timezone(&Local).format("%H:%M").to_string(), s.content))
                .collect());
        }
        let daily = self.store.summaries_by_range(SummaryType::Daily, start, end)?;
        Ok(daily
            .into_iter()
            .map(|s| (s.start_time.with_timezone(&Local).format("%Y-%m-%d").to_string(), s.content))
            .collect())
    }

    async fn format_detail_window(&self, captures: Vec<Capture>, ocr: Option<&OcrQueue>) -> Result<String> {
        let mut screen_count = 0;
        let mut non_screen_count = 0;
        let mut ocr_budget = MAX_ON_DEMAND_OCR;

        let mut block = String::from("=== Recent Detail ===\n");
        for capture in captures {
            if capture.source == Source::Screen {
                if screen_count >= MAX_SCREEN_CAPTURES {
                    continue;
                }
                screen_count += 1;
            } else {
                if non_screen_count >= MAX_NON_SCREEN_CAPTURES {
                    continue;
                }
                non_screen_count += 1;
            }
            block.push_str(&self.format_capture(capture, ocr, &mut ocr_budget).await);
        }
        Ok(block)
    }

    async fn format_capture(&self, mut capture: Capture, ocr: Option<&OcrQueue>, ocr_budget: &mut usize) -> String {
        let time_label = capture.timestamp.with_timezone(&Local).format("%H:%M:%S");

        if capture.source == Source::Screen && capture.text_data.as_deref().unwrap_or("").is_empty() {
            if *ocr_budget > 0 {
                if let (Some(ocr), Some(path)) = (ocr, capture.raw_data_path.clone()) {
                    *ocr_budget -= 1;
                    if let Some(text) = ocr.run_sync(capture.id, &path).await {
                        capture.text_data = Some(text);
                    }
                }
            }
        }

        let mut line = format!("[{time_label}] ");
        match capture.source {
            Source::Window => {
                let app = capture.metadata.get("app_class").cloned().unwrap_or_default();
                let title = capture.metadata.get("title").cloned().unwrap_or_default();
                line.push_str(&format!("App: {app} Title: {title}"));
            }
            Source::Screen => {
                if let Some(text) = capture.text_data.take().filter(|t| !t.is_empty()) {
                    line.push_str(&format!("Screen: {text}"));
                } else {
                    line.push_str("Screen: [Screenshot - no OCR]");
                }
            }
            Source::Clipboard => {
                line.push_str(&format!("Clipboard: {}", capture.text_data.clone().unwrap_or_default()));
            }
            Source::Git => {
                let repo = capture.metadata.get("repo").cloned().unwrap_or_default();
                line.push_str(&format!("Git: {repo} {}", capture.text_data.clone().unwrap_or_default()));
            }
            Source::Activity => {
                let state = capture.metadata.get("state").cloned().unwrap_or_default();
                line.push_str(&format!("Activity: {state}"));
            }
            Source::Biometrics => {
                let level = capture.metadata.get("stress_level").cloned().unwrap_or_default();
                line.push_str(&format!("Stress level: {level}"));
            }
            Source::Gmail | Source::Slack | Source::Calendar => {
                line.push_str(&format!(
                    "{}: {}",
                    capture.source,
                    capture.text_data.clone().unwrap_or_default()
                ));
            }
        }
        line.truncate(MAX_CHARS_PER_CAPTURE.min(line.len()));
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewCapture;

    #[tokio::test]
    async fn older_summaries_prefer_hourly_over_daily() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let llm = Arc::new(LlmClient::new("", "test-model", "http://localhost/unused"));
        let engine = QueryEngine::new(store.clone(), llm);

        let start = Utc::now() - Duration::hours(3);
        let end = Utc::now();
        store
            .upsert_summary(&crate::models::Summary {
                summary_type: SummaryType::Hourly,
                start_time: start,
                end_time: start + Duration::hours(1),
                content: "hourly summary".into(),
                apps: "".into(),
                tokens: 5,
            })
            .unwrap();

        let summaries = engine.older_summaries(start, end).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].1, "hourly summary");
    }

    #[tokio::test]
    async fn detail_window_caps_screen_captures() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let llm = Arc::new(LlmClient::new("", "test-model", "http://localhost/unused"));
        let engine = QueryEngine::new(store.clone(), llm);

        for i in 0..15 {
            store
                .insert_capture(&NewCapture::new(Source::Screen).with_text(format!("frame {i}")))
                .unwrap();
        }
        let captures = store.get_recent(100).unwrap();
        let block = engine.format_detail_window(captures, None).await.unwrap();
        assert_eq!(block.matches("Screen:").count(), MAX_SCREEN_CAPTURES);
    }

    #[tokio::test]
    async fn on_demand_ocr_surfaces_extracted_text_in_the_same_query() {
        use crate::ocr::OcrQueue;

        let store = Arc::new(Store::open_in_memory().unwrap());
        let llm = Arc::new(LlmClient::new("", "test-model", "http://localhost/unused"));
        let engine = QueryEngine::new(store.clone(), llm);

        let blob_path = "screens/unocred.png".to_string();
        store
            .insert_capture(
                &NewCapture::new(Source::Screen).with_blob(blob_path.clone()),
            )
            .unwrap();
        let captures = store.get_recent(10).unwrap();
        assert_eq!(captures.len(), 1);
        assert!(captures[0].text_data.as_deref().unwrap_or("").is_empty());

        let ocr = OcrQueue::new_with_seeded_cache(
            store.clone(),
            vec![(blob_path, "terminal showing a passing test run".to_string())],
        );

        let block = engine.format_detail_window(captures, Some(&ocr)).await.unwrap();
        assert!(block.contains("terminal showing a passing test run"));
        assert!(!block.contains("[Screenshot - no OCR]"));
    }
}
