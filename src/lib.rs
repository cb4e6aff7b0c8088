pub mod cli;
pub mod config;
pub mod error;
pub mod focus;
pub mod insights;
pub mod llm;
pub mod models;
pub mod notify;
pub mod ocr;
pub mod privacy;
pub mod query;
pub mod samplers;
pub mod scheduler;
pub mod socket;
pub mod storage;
pub mod summarizer;
pub mod widget;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::watch;

use config::AppConfig;
use error::Result;
use focus::controller::PlatformController;
use focus::FocusEnforcer;
use insights::InsightEngine;
use llm::LlmClient;
use notify::{DesktopNotifier, LogNotifier, Notifier};
use ocr::OcrQueue;
use privacy::PrivacyPolicy;
use query::QueryEngine;
use samplers::{activity::ActivitySampler, biometrics::BiometricsSampler, clipboard::ClipboardSampler};
use samplers::{external::ExternalSampler, git::GitSampler, screen::ScreenSampler, window::WindowSampler};
use samplers::Sampler;
use scheduler::CaptureScheduler;
use socket::PushSocket;
use storage::{BlobStore, SecretBox, Store};
use summarizer::Summarizer;
use widget::WidgetState;

/// Everything the daemon needs once, built from config: the store, blob
/// root, OCR/chat/summary LLM clients, and the background task handles
/// spawned on [`Daemon::start`]. One instance per process.
pub struct Daemon {
    pub store: Arc<Store>,
    pub blobs: Arc<BlobStore>,
    pub secrets: Arc<SecretBox>,
    pub config: AppConfig,
    pub query_engine: Arc<QueryEngine>,
    pub ocr: Arc<OcrQueue>,
    notifier: Arc<dyn Notifier>,
    socket: Option<Arc<PushSocket>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Daemon {
    /// Opens storage and wires every component from `config`. Does not
    /// start any background task; call [`Daemon::start`] for that.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let data_dir = config.data_path();
        let store = Arc::new(Store::open(&data_dir.join("mnemosyne.db"))?);
        let blobs = Arc::new(BlobStore::new(data_dir.join("captures")));
        let secrets = Arc::new(SecretBox::open_or_create(&storage::secrets::default_key_path(&data_dir))?);

        let chat_llm = Arc::new(LlmClient::new(&config.llm.api_key, &config.llm.chat_model, &config.llm.api_endpoint));
        let query_engine = Arc::new(QueryEngine::new(store.clone(), chat_llm));

        let policy = Arc::new(PrivacyPolicy::from_config(&config));
        let vision_llm = Arc::new(LlmClient::new(
            &config.llm.api_key,
            &config.llm.ocr_vision_model,
            &config.llm.api_endpoint,
        ));
        let compress_llm = Arc::new(LlmClient::new(
            &config.llm.api_key,
            &config.llm.ocr_compress_model,
            &config.llm.api_endpoint,
        ));
        let ocr = Arc::new(OcrQueue::start(store.clone(), vision_llm, compress_llm, policy, 2));

        let notifier: Arc<dyn Notifier> = if config.insights.desktop_notifications {
            Arc::new(DesktopNotifier)
        } else {
            Arc::new(LogNotifier)
        };

        let socket = PushSocket::bind(&data_dir).await.unwrap_or(None).map(Arc::new);

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            store,
            blobs,
            secrets,
            config,
            query_engine,
            ocr,
            notifier,
            socket,
            stop_tx,
            stop_rx,
        })
    }

    /// Spawns every background task named in `spec.md` §5: one per
    /// sampler, the OCR worker pool, the summarizer's hourly/daily tasks,
    /// the insight engine's realtime/batch tasks, and the stale-session
    /// reaper. Returns once every task is spawned; they run until
    /// [`Daemon::shutdown`] is called.
    pub fn start(&self) {
        let capture_scheduler = CaptureScheduler::new(self.store.clone(), self.blobs.clone(), Some(self.ocr.clone()));
        let samplers = self.build_samplers();
        capture_scheduler.start(&self.config, samplers, self.stop_rx.clone());

        let summary_llm = Arc::new(LlmClient::new(
            &self.config.llm.api_key,
            &self.config.llm.summary_model,
            &self.config.llm.api_endpoint,
        ));
        Arc::new(Summarizer::new(self.store.clone(), summary_llm.clone())).spawn(self.stop_rx.clone());

        if self.config.insights.enabled {
            let insight_engine = Arc::new(InsightEngine::new(
                self.store.clone(),
                summary_llm,
                self.notifier.clone(),
                self.socket.clone(),
                self.config.insights.desktop_notifications,
                self.config.insights.batch_interval_minutes,
            ));
            insight_engine.spawn(self.stop_rx.clone());
        }

        self.spawn_session_reaper();
    }

    fn build_samplers(&self) -> Vec<(Box<dyn Sampler>, StdDuration)> {
        let mut samplers: Vec<(Box<dyn Sampler>, StdDuration)> = Vec::new();
        let c = &self.config;

        if c.window_capture_enabled {
            samplers.push((
                Box::new(WindowSampler::new()),
                StdDuration::from_secs(c.window_interval_secs),
            ));
        }
        if c.screen_capture_enabled {
            samplers.push((
                Box::new(ScreenSampler::new()),
                StdDuration::from_secs(c.screen_interval_secs),
            ));
        }
        if c.clipboard_capture_enabled {
            samplers.push((
                Box::new(ClipboardSampler::new()),
                StdDuration::from_secs(c.window_interval_secs),
            ));
        }
        if c.git_capture_enabled {
            let repo_paths = c.git_repo_paths.iter().map(std::path::PathBuf::from).collect();
            samplers.push((
                Box::new(GitSampler::new(repo_paths)),
                StdDuration::from_secs(c.git_interval_secs),
            ));
        }
        samplers.push((
            Box::new(ActivitySampler::new()),
            StdDuration::from_secs(c.activity_interval_secs),
        ));
        samplers.push((
            Box::new(BiometricsSampler::new(None)),
            StdDuration::from_secs(c.biometrics_interval_secs),
        ));
        samplers.push((Box::new(ExternalSampler::gmail(None)), StdDuration::from_secs(300)));
        samplers.push((Box::new(ExternalSampler::slack(None)), StdDuration::from_secs(300)));
        samplers.push((Box::new(ExternalSampler::calendar(None)), StdDuration::from_secs(300)));

        samplers
    }

    fn spawn_session_reaper(&self) {
        let store = self.store.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_secs(60));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match focus::reap_stale_sessions(&store) {
                            Ok(reaped) if !reaped.is_empty() => {
                                log::info!("reaped {} stale focus session(s)", reaped.len());
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!("session reaper failed: {e}"),
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() { break; }
                    }
                }
            }
        });
    }

    /// Starts a focus session against `mode_id`, refusing if one is
    /// already active (per `spec.md` §8 invariant 3).
    pub fn start_focus_session(self: &Arc<Self>, mode_id: &str) -> anyhow::Result<String> {
        if self.store.active_session(focus::STALE_SESSION_AFTER)?.is_some() {
            anyhow::bail!("a focus session is already active");
        }
        let mode = self
            .store
            .get_focus_mode(mode_id)?
            .ok_or_else(|| anyhow::anyhow!("no focus mode named {mode_id}"))?;
        let session = self.store.start_session(mode_id, mode.duration_minutes)?;

        let controller: Arc<dyn focus::controller::Controller> = Arc::new(PlatformController);
        let chat_llm = Arc::new(LlmClient::new(
            &self.config.llm.api_key,
            &self.config.llm.chat_model,
            &self.config.llm.api_endpoint,
        ));
        let widget_path = widget::widget_path(&self.config.data_path());
        let state = WidgetState {
            active: true,
            mode_name: Some(mode.name.clone()),
            elapsed_secs: 0,
            blocks_count: 0,
            last_decision: None,
            last_action: None,
        };
        widget::write_widget_state(&widget_path, &state)?;

        let enforcer = Arc::new(FocusEnforcer::new(self.store.clone(), chat_llm, controller, widget_path));
        enforcer.spawn(session.id.clone(), mode, self.stop_rx.clone());

        Ok(session.id)
    }

    pub fn stop_focus_session(&self) -> anyhow::Result<()> {
        if let Some(session) = self.store.active_session(focus::STALE_SESSION_AFTER)? {
            self.store.end_session(&session.id, Some("user_stop"))?;
            let widget_path = widget::widget_path(&self.config.data_path());
            widget::write_widget_state(&widget_path, &WidgetState::inactive())?;
        }
        Ok(())
    }

    /// Deletes raw captures (and their blobs) in `[start, end)`, per the
    /// Open Question resolution in `spec.md` §9: summaries and insights
    /// are left intact.
    pub fn clear_captures(&self, start: chrono::DateTime<chrono::Utc>, end: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let paths = self.store.clear_captures_in_range(start, end)?;
        let count = paths.len();
        for path in paths {
            if let Err(e) = self.blobs.delete(std::path::Path::new(&path)) {
                log::warn!("failed to delete blob {path}: {e}");
            }
        }
        Ok(count)
    }

    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }
}

