use async_trait::async_trait;

use crate::error::Result;
use crate::models::Source;
use crate::storage::SecretBox;

use super::{PollOutcome, Sampler, SamplerContext};

/// Uniform adapter over an OAuth-backed external collaborator (mailbox,
/// chat, calendar). The OAuth client and provider-specific API calls are
/// out of scope per `spec.md` §1 — this struct only encodes the contract
/// every such sampler presents to the scheduler: unavailable without a
/// sealed token, otherwise a `poll` that an adapter implementation fills in.
pub struct ExternalSampler {
    source: Source,
    sealed_token: Option<String>,
}

impl ExternalSampler {
    pub fn gmail(sealed_token: Option<String>) -> Self {
        Self {
            source: Source::Gmail,
            sealed_token,
        }
    }

    pub fn slack(sealed_token: Option<String>) -> Self {
        Self {
            source: Source::Slack,
            sealed_token,
        }
    }

    pub fn calendar(sealed_token: Option<String>) -> Self {
        Self {
            source: Source::Calendar,
            sealed_token,
        }
    }

    /// Decrypt the stored token for a concrete adapter to present to its
    /// provider's HTTP client. Adapters beyond this contract boundary are
    /// not implemented here.
    pub fn unseal_token(&self, secrets: &SecretBox) -> anyhow::Result<Option<String>> {
        self.sealed_token
            .as_deref()
            .map(|sealed| secrets.open(sealed))
            .transpose()
    }
}

#[async_trait]
impl Sampler for ExternalSampler {
    fn source(&self) -> Source {
        self.source
    }

    fn available(&self) -> bool {
        self.sealed_token.is_some()
    }

    async fn poll(&mut self, _ctx: &SamplerContext<'_>) -> Result<PollOutcome> {
        // No concrete provider is wired up in the core; a real
        // implementation lives outside this crate and calls through this
        // same `Sampler` impl.
        Ok(PollOutcome::Skipped)
    }
}
