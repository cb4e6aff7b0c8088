use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Local;
use tokio::sync::{watch, Notify};
use tokio::time::interval;

use crate::config::AppConfig;
use crate::models::{NewCapture, Source};
use crate::ocr::OcrQueue;
use crate::privacy::{self, FilterDecision, PrivacyPolicy};
use crate::samplers::{PollOutcome, Sampler, SamplerContext};
use crate::storage::{BlobStore, Store};

const DEFAULT_POLL_TIMEOUT: StdDuration = StdDuration::from_secs(30);
const SCREEN_POLL_TIMEOUT: StdDuration = StdDuration::from_secs(180);
const WRITE_QUEUE_CAPACITY: usize = 256;

/// A privacy-cleared record waiting to be persisted.
struct QueuedWrite {
    source: Source,
    capture: NewCapture,
}

fn is_droppable(source: Source) -> bool {
    matches!(source, Source::Screen | Source::Clipboard)
}

/// Bounded write queue implementing the §4.3 backpressure policy: when
/// full, drop the oldest screen/clipboard entry first; git and biometrics
/// entries are never evicted. If the queue is full and contains no
/// droppable entry, the incoming record itself is dropped instead — the
/// store must never block a sampler task.
struct WriteQueue {
    items: Mutex<VecDeque<QueuedWrite>>,
    capacity: usize,
    notify: Notify,
}

impl WriteQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    fn push(&self, write: QueuedWrite) {
        let mut items = self.items.lock().unwrap();
        if items.len() >= self.capacity {
            if let Some(pos) = items.iter().position(|w| is_droppable(w.source)) {
                let evicted = items.remove(pos).unwrap();
                log::warn!("write queue full, dropped oldest {} capture", evicted.source);
            } else {
                log::warn!(
                    "write queue full of non-droppable entries, dropping incoming {} capture",
                    write.source
                );
                return;
            }
        }
        items.push_back(write);
        drop(items);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<QueuedWrite> {
        loop {
            {
                let mut items = self.items.lock().unwrap();
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Drives every configured [`Sampler`] on its own cadence and funnels
/// accepted records through the privacy filter into the [`Store`], per
/// `spec.md` §4.3. Grounded in the teacher's `Scheduler::start`
/// (one spawned task per capture kind, `tokio::select!` against a shared
/// `watch` cancellation channel).
pub struct CaptureScheduler {
    store: Arc<Store>,
    blobs: Arc<BlobStore>,
    ocr: Option<Arc<OcrQueue>>,
}

impl CaptureScheduler {
    pub fn new(store: Arc<Store>, blobs: Arc<BlobStore>, ocr: Option<Arc<OcrQueue>>) -> Self {
        Self { store, blobs, ocr }
    }

    /// Spawn one task per sampler plus the write-queue drain task. Returns
    /// immediately; tasks run until `stop_rx` reports `true`.
    pub fn start(
        &self,
        config: &AppConfig,
        samplers: Vec<(Box<dyn Sampler>, StdDuration)>,
        stop_rx: watch::Receiver<bool>,
    ) {
        let queue = Arc::new(WriteQueue::new(WRITE_QUEUE_CAPACITY));
        self.spawn_writer(queue.clone(), stop_rx.clone());

        let policy = Arc::new(PrivacyPolicy::from_config(config));
        let dedup_hash_threshold = config.dedup_hash_threshold;

        for (sampler, interval_duration) in samplers {
            let blobs = self.blobs.clone();
            let policy = policy.clone();
            let queue = queue.clone();
            let mut stop_rx = stop_rx.clone();

            tokio::spawn(async move {
                let mut sampler = sampler;
                if !sampler.available() {
                    log::info!("sampler {} unavailable, not starting", sampler.source());
                    return;
                }
                let source = sampler.source();
                let mut ticker = interval(interval_duration);
                let timeout = if source == Source::Screen {
                    SCREEN_POLL_TIMEOUT
                } else {
                    DEFAULT_POLL_TIMEOUT
                };

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let ctx = SamplerContext { blobs: &blobs, dedup_hash_threshold };
                            match tokio::time::timeout(timeout, sampler.poll(&ctx)).await {
                                Ok(Ok(PollOutcome::Captured(capture))) => {
                                    let now = Local::now().time();
                                    match privacy::apply(capture, &policy, now) {
                                        FilterDecision::Accept(capture) => {
                                            queue.push(QueuedWrite { source, capture });
                                        }
                                        FilterDecision::Drop => {
                                            log::debug!("privacy filter dropped a {source} capture");
                                        }
                                    }
                                }
                                Ok(Ok(PollOutcome::Skipped)) => {}
                                Ok(Err(e)) => log::warn!("{source} sampler error: {e}"),
                                Err(_) => log::warn!("{source} sampler poll timed out"),
                            }
                        }
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() {
                                log::info!("{source} sampler stopped");
                                break;
                            }
                        }
                    }
                }
            });
        }
    }

    fn spawn_writer(&self, queue: Arc<WriteQueue>, mut stop_rx: watch::Receiver<bool>) {
        let store = self.store.clone();
        let ocr = self.ocr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_item = queue.pop() => {
                        let Some(item) = maybe_item else { continue };
                        let new_capture = item.capture;
                        match store.insert_capture(&new_capture) {
                            Ok(id) => {
                                if item.source == Source::Screen {
                                    if let (Some(ocr), Some(path)) = (&ocr, new_capture.raw_data_path.clone()) {
                                        ocr.enqueue(id, path);
                                    }
                                }
                            }
                            Err(e) => log::error!("failed to persist {}: {e}", item.source),
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(source: Source) -> QueuedWrite {
        QueuedWrite {
            source,
            capture: NewCapture::new(source),
        }
    }

    #[test]
    fn drops_oldest_droppable_when_full() {
        let queue = WriteQueue::new(2);
        queue.push(write(Source::Screen));
        queue.push(write(Source::Git));
        // Queue full: screen is droppable, git is not — screen gets evicted.
        queue.push(write(Source::Clipboard));
        let items = queue.items.lock().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|w| w.source == Source::Git));
        assert!(items.iter().any(|w| w.source == Source::Clipboard));
        assert!(!items.iter().any(|w| w.source == Source::Screen));
    }

    #[test]
    fn never_evicts_git_or_biometrics() {
        let queue = WriteQueue::new(2);
        queue.push(write(Source::Git));
        queue.push(write(Source::Biometrics));
        // No droppable entry present — the incoming record is dropped instead.
        queue.push(write(Source::Window));
        let items = queue.items.lock().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|w| w.source == Source::Git));
        assert!(items.iter().any(|w| w.source == Source::Biometrics));
    }
}
