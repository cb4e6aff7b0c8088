use arboard::Clipboard;
use async_trait::async_trait;

use crate::error::{MnemosyneError, Result};
use crate::models::{NewCapture, Source};

use super::{PollOutcome, Sampler, SamplerContext};

/// Text clipboard contents, deduplicated against the last seen value.
/// Image clipboard contents are out of scope per `spec.md` §4.3 — only
/// `get_text` is ever called.
pub struct ClipboardSampler {
    clipboard: Option<Clipboard>,
    last_seen: Option<String>,
}

impl ClipboardSampler {
    pub fn new() -> Self {
        Self {
            clipboard: Clipboard::new().ok(),
            last_seen: None,
        }
    }
}

impl Default for ClipboardSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sampler for ClipboardSampler {
    fn source(&self) -> Source {
        Source::Clipboard
    }

    fn available(&self) -> bool {
        self.clipboard.is_some()
    }

    async fn poll(&mut self, _ctx: &SamplerContext<'_>) -> Result<PollOutcome> {
        let Some(clipboard) = self.clipboard.as_mut() else {
            return Err(MnemosyneError::Unavailable("clipboard".into()));
        };
        let text = match clipboard.get_text() {
            Ok(text) => text,
            Err(_) => return Ok(PollOutcome::Skipped),
        };
        if text.trim().is_empty() {
            return Ok(PollOutcome::Skipped);
        }
        if self.last_seen.as_deref() == Some(text.as_str()) {
            return Ok(PollOutcome::Skipped);
        }
        self.last_seen = Some(text.clone());

        Ok(PollOutcome::Captured(
            NewCapture::new(Source::Clipboard).with_text(text),
        ))
    }
}
