use thiserror::Error;

/// Abstract error taxonomy from the design spec (see `spec.md` §7).
///
/// Background tasks match on `kind()` to decide whether to retry on the next
/// cadence, log-and-continue, or treat the failure as fatal; user-initiated
/// calls (queries, focus commands) convert these into short, final messages.
#[derive(Debug, Error)]
pub enum MnemosyneError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("LLM protocol error: {0}")]
    LlmProtocol(String),

    #[error("OCR failed: {0}")]
    Ocr(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("storage open error: {0}")]
    StorageOpen(String),

    #[error("LLM response failed schema validation: {0}")]
    PolicyViolation(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("sampler unavailable on this platform: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MnemosyneError {
    pub fn kind(&self) -> &'static str {
        match self {
            MnemosyneError::TransientNetwork(_) => "transient_network",
            MnemosyneError::LlmProtocol(_) => "llm_protocol",
            MnemosyneError::Ocr(_) => "ocr",
            MnemosyneError::Storage(_) => "storage",
            MnemosyneError::StorageOpen(_) => "storage_open",
            MnemosyneError::PolicyViolation(_) => "policy_violation",
            MnemosyneError::Cancelled => "cancelled",
            MnemosyneError::Unavailable(_) => "unavailable",
            MnemosyneError::Other(_) => "other",
        }
    }

    /// Whether a background task should retry this kind on its next cadence
    /// rather than surface it to a user.
    pub fn is_background_retryable(&self) -> bool {
        matches!(
            self,
            MnemosyneError::TransientNetwork(_) | MnemosyneError::LlmProtocol(_) | MnemosyneError::Ocr(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MnemosyneError>;

/// Render an error the way a user-initiated query surfaces it: short,
/// preserving the caller's input, never a raw debug dump.
pub fn user_facing_message(err: &MnemosyneError) -> String {
    match err {
        MnemosyneError::Cancelled => "Query cancelled.".to_string(),
        other => format!("Error: {}", other),
    }
}
