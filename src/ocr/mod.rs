use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};

use crate::error::Result;
use crate::llm::LlmClient;
use crate::privacy::{self, FilterDecision, PrivacyPolicy};
use crate::storage::Store;

const DEFAULT_WORKER_COUNT: usize = 2;
const JOB_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

const STAGE1_PROMPT: &str = "Describe this screenshot for a personal activity log. \
Identify the application, window title, what the user appears to be doing, any \
visible body text, and any visible error messages. Be concise and factual.";

const STAGE2_PROMPT: &str = "Compress the following screenshot description into 1-2 \
sentences, preserving the key nouns and actions a person would want to recall later. \
Do not use markdown.";

struct Job {
    capture_id: i64,
    blob_path: String,
}

/// Two-stage OCR pipeline: a vision-capable model extracts a structured
/// description (stage 1), then a cheaper text model compresses it to 1-2
/// sentences (stage 2) that becomes the capture's `text_data`, per
/// `spec.md` §4.4. Runs off the sampler's hot path — the sampler only
/// enqueues a job keyed by capture id after writing the blob synchronously.
/// Also reachable synchronously via [`OcrQueue::run_sync`] for the query
/// engine's on-demand path, which needs the extracted text before it can
/// finish formatting the capture it belongs to.
pub struct OcrQueue {
    tx: mpsc::UnboundedSender<Job>,
    store: Arc<Store>,
    vision_client: Arc<LlmClient>,
    compress_client: Arc<LlmClient>,
    policy: Arc<PrivacyPolicy>,
    cache: Arc<Mutex<HashMap<String, String>>>,
}

impl OcrQueue {
    pub fn start(
        store: Arc<Store>,
        vision_client: Arc<LlmClient>,
        compress_client: Arc<LlmClient>,
        policy: Arc<PrivacyPolicy>,
        worker_count: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let worker_count = if worker_count == 0 { DEFAULT_WORKER_COUNT } else { worker_count };
        let cache: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let semaphore = Arc::new(Semaphore::new(worker_count));
        let rx = Arc::new(Mutex::new(rx));

        for _ in 0..worker_count {
            let rx = rx.clone();
            let store = store.clone();
            let vision_client = vision_client.clone();
            let compress_client = compress_client.clone();
            let policy = policy.clone();
            let cache = cache.clone();
            let semaphore = semaphore.clone();

            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };
                    let _permit = semaphore.acquire().await;
                    process_job(&store, &vision_client, &compress_client, &policy, &cache, job).await;
                }
            });
        }

        Self {
            tx,
            store,
            vision_client,
            compress_client,
            policy,
            cache,
        }
    }

    /// Queues `capture_id` for background OCR; returns immediately without
    /// waiting for the result. Used by the capture samplers, which must
    /// never block on an LLM round trip.
    pub fn enqueue(&self, capture_id: i64, blob_path: String) {
        let _ = self.tx.send(Job { capture_id, blob_path });
    }

    /// Test-only constructor: seeds the dedup cache with `blob_path ->
    /// text` pairs so [`Self::run_sync`] returns them without calling an
    /// LLM, letting callers exercise the on-demand OCR path without
    /// network access.
    #[cfg(test)]
    pub fn new_with_seeded_cache(store: Arc<Store>, seeded: Vec<(String, String)>) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel::<Job>();
        Self {
            tx,
            store,
            vision_client: Arc::new(LlmClient::new("", "unused", "http://localhost/unused")),
            compress_client: Arc::new(LlmClient::new("", "unused", "http://localhost/unused")),
            policy: Arc::new(PrivacyPolicy::from_config(&crate::config::AppConfig::default())),
            cache: Arc::new(Mutex::new(seeded.into_iter().collect())),
        }
    }

    /// Runs the OCR pipeline for `capture_id` inline and returns the
    /// extracted (privacy-filtered) text once it completes, persisting it
    /// the same way the background workers do. Used by the query engine's
    /// on-demand path (`spec.md` §4.6), which needs the text before it can
    /// finish formatting the response and so cannot use [`Self::enqueue`].
    pub async fn run_sync(&self, capture_id: i64, blob_path: &str) -> Option<String> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.get(blob_path) {
                let now = chrono::Local::now().time();
                let filtered = apply_filter_to_text(cached, &self.policy, now);
                if let Some(text) = &filtered {
                    if let Err(e) = self.store.update_capture_text(capture_id, text) {
                        log::error!("failed to persist cached OCR text: {e}");
                    }
                }
                return filtered;
            }
        }

        let text = run_pipeline(&self.vision_client, &self.compress_client, blob_path).await?;
        self.cache.lock().await.insert(blob_path.to_string(), text.clone());
        let now = chrono::Local::now().time();
        let filtered = apply_filter_to_text(&text, &self.policy, now);
        if let Some(text) = &filtered {
            if let Err(e) = self.store.update_capture_text(capture_id, text) {
                log::error!("failed to persist OCR text for capture {capture_id}: {e}");
            }
        }
        filtered
    }

    /// Backfill: scan captures missing OCR text whose blob still exists and
    /// run the pipeline synchronously, rate-limited to `max_items` per call
    /// so repeated invocations are resumable. Returns the number processed.
    pub async fn backfill(
        store: &Store,
        vision_client: &LlmClient,
        compress_client: &LlmClient,
        policy: &PrivacyPolicy,
        max_items: usize,
    ) -> Result<usize> {
        let candidates = store.find_ocr_backfill_candidates(max_items)?;
        let mut processed = 0;
        for capture in candidates {
            let Some(path) = capture.raw_data_path.clone() else {
                continue;
            };
            if !crate::storage::BlobStore::exists(&path) {
                continue;
            }
            if let Some(text) = run_pipeline(vision_client, compress_client, &path).await {
                let now = chrono::Local::now().time();
                let filtered = apply_filter_to_text(&text, policy, now);
                if let Some(text) = filtered {
                    store.update_capture_text(capture.id, &text)?;
                }
            }
            processed += 1;
        }
        Ok(processed)
    }
}

fn apply_filter_to_text(text: &str, policy: &PrivacyPolicy, now: chrono::NaiveTime) -> Option<String> {
    let candidate = crate::models::NewCapture::new(crate::models::Source::Screen).with_text(text);
    match privacy::apply(candidate, policy, now) {
        FilterDecision::Accept(capture) => capture.text_data,
        FilterDecision::Drop => None,
    }
}

async fn run_pipeline(vision_client: &LlmClient, compress_client: &LlmClient, path: &str) -> Option<String> {
    let bytes = tokio::fs::read(path).await.ok()?;
    let stage1 = tokio::time::timeout(
        JOB_TIMEOUT,
        vision_client.complete_multimodal(STAGE1_PROMPT, &[bytes]),
    )
    .await
    .ok()?
    .ok()?;
    let stage2 = tokio::time::timeout(
        JOB_TIMEOUT,
        compress_client.complete_text(STAGE2_PROMPT, &stage1),
    )
    .await
    .ok()?
    .ok()?;
    Some(stage2)
}

async fn process_job(
    store: &Store,
    vision_client: &LlmClient,
    compress_client: &LlmClient,
    policy: &PrivacyPolicy,
    cache: &Mutex<HashMap<String, String>>,
    job: Job,
) {
    {
        let cache = cache.lock().await;
        if let Some(cached) = cache.get(&job.blob_path) {
            let now = chrono::Local::now().time();
            if let Some(text) = apply_filter_to_text(cached, policy, now) {
                if let Err(e) = store.update_capture_text(job.capture_id, &text) {
                    log::error!("failed to persist cached OCR text: {e}");
                }
            }
            return;
        }
    }

    match run_pipeline(vision_client, compress_client, &job.blob_path).await {
        Some(text) => {
            cache.lock().await.insert(job.blob_path.clone(), text.clone());
            let now = chrono::Local::now().time();
            if let Some(text) = apply_filter_to_text(&text, policy, now) {
                if let Err(e) = store.update_capture_text(job.capture_id, &text) {
                    log::error!("failed to persist OCR text for capture {}: {e}", job.capture_id);
                }
            }
        }
        None => {
            log::warn!(
                "OCR pipeline failed or timed out for capture {}; text_data left empty",
                job.capture_id
            );
        }
    }
}
