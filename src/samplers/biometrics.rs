use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{MnemosyneError, Result};
use crate::models::{NewCapture, Source, StressLevel};

use super::{PollOutcome, Sampler, SamplerContext};

#[derive(Debug, Deserialize)]
struct Reading {
    score: f32,
}

/// Reads stress readings dropped by an external biometrics bridge (wearable
/// companion app, HealthKit exporter, ...) as a one-line JSON object
/// `{"score": <0-100>}` in a file at `feed_path`. The bridge process itself
/// is out of scope per `spec.md` §8 — this sampler only consumes its
/// output, and reports unavailable when no feed is configured or present.
pub struct BiometricsSampler {
    feed_path: Option<PathBuf>,
    last_score: Option<f32>,
}

impl BiometricsSampler {
    pub fn new(feed_path: Option<PathBuf>) -> Self {
        Self {
            feed_path,
            last_score: None,
        }
    }
}

#[async_trait]
impl Sampler for BiometricsSampler {
    fn source(&self) -> Source {
        Source::Biometrics
    }

    fn available(&self) -> bool {
        self.feed_path.as_ref().is_some_and(|p| p.exists())
    }

    async fn poll(&mut self, _ctx: &SamplerContext<'_>) -> Result<PollOutcome> {
        let Some(path) = &self.feed_path else {
            return Err(MnemosyneError::Unavailable("biometrics".into()));
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MnemosyneError::Unavailable(format!("biometrics feed unreadable: {e}")))?;
        let reading: Reading = serde_json::from_str(contents.trim())
            .map_err(|e| MnemosyneError::Unavailable(format!("biometrics feed malformed: {e}")))?;

        if self.last_score == Some(reading.score) {
            return Ok(PollOutcome::Skipped);
        }
        self.last_score = Some(reading.score);

        let level = StressLevel::from_score(reading.score);
        let capture = NewCapture::new(Source::Biometrics)
            .with_meta("stress_score", format!("{:.1}", reading.score))
            .with_meta("stress_level", format!("{:?}", level).to_lowercase());
        Ok(PollOutcome::Captured(capture))
    }
}
