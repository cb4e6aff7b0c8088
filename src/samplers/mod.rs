pub mod activity;
pub mod biometrics;
pub mod clipboard;
pub mod external;
pub mod git;
pub mod screen;
pub mod window;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewCapture, Source};
use crate::storage::BlobStore;

/// Shared resources a sampler needs to produce a capture, assembled once by
/// the scheduler and handed to every `poll` call.
pub struct SamplerContext<'a> {
    pub blobs: &'a BlobStore,
    pub dedup_hash_threshold: u32,
}

/// What a single poll of a sampler produced.
pub enum PollOutcome {
    Captured(NewCapture),
    /// Nothing worth recording this tick (e.g. window unchanged, screenshot
    /// too similar to the last one).
    Skipped,
}

/// Common shape every capture source implements, per `spec.md` §4.3. Each
/// sampler owns whatever state it needs across ticks (last window title,
/// last screenshot hash, ...) as `&mut self`.
#[async_trait]
pub trait Sampler: Send {
    fn source(&self) -> Source;

    /// Whether this sampler can run at all on the current platform/config —
    /// e.g. an external sampler with no OAuth token configured reports
    /// `false` so the scheduler never spawns a task for it.
    fn available(&self) -> bool {
        true
    }

    async fn poll(&mut self, ctx: &SamplerContext<'_>) -> Result<PollOutcome>;
}
