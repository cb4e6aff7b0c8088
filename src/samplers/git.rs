use async_trait::async_trait;
use git2::Repository;

use crate::error::Result;
use crate::models::{NewCapture, Source};

use super::{PollOutcome, Sampler, SamplerContext};

/// Watches a fixed set of repository roots and captures the latest commit on
/// HEAD whenever it changes, per `spec.md` §4.3. Repositories that
/// disappear or fail to open are skipped rather than treated as fatal —
/// a removed clone shouldn't stop capture for the rest.
pub struct GitSampler {
    repo_paths: Vec<std::path::PathBuf>,
    last_seen: std::collections::HashMap<std::path::PathBuf, String>,
}

impl GitSampler {
    pub fn new(repo_paths: Vec<std::path::PathBuf>) -> Self {
        Self {
            repo_paths,
            last_seen: std::collections::HashMap::new(),
        }
    }

    fn latest_commit(path: &std::path::Path) -> Option<(String, String, String)> {
        let repo = Repository::open(path).ok()?;
        let head = repo.head().ok()?;
        let commit = head.peel_to_commit().ok()?;
        let oid = commit.id().to_string();
        let summary = commit.summary().unwrap_or("").to_string();
        let author = commit.author().name().unwrap_or("").to_string();
        Some((oid, summary, author))
    }
}

#[async_trait]
impl Sampler for GitSampler {
    fn source(&self) -> Source {
        Source::Git
    }

    fn available(&self) -> bool {
        !self.repo_paths.is_empty()
    }

    async fn poll(&mut self, _ctx: &SamplerContext<'_>) -> Result<PollOutcome> {
        for path in self.repo_paths.clone() {
            let Some((oid, summary, author)) = Self::latest_commit(&path) else {
                continue;
            };
            if self.last_seen.get(&path) == Some(&oid) {
                continue;
            }
            self.last_seen.insert(path.clone(), oid.clone());

            let capture = NewCapture::new(Source::Git)
                .with_text(summary)
                .with_meta("repo", path.to_string_lossy().to_string())
                .with_meta("commit", oid)
                .with_meta("author", author);
            return Ok(PollOutcome::Captured(capture));
        }
        Ok(PollOutcome::Skipped)
    }
}
