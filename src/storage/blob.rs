use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use rand::Rng;

use crate::models::Source;

/// Content-addressed-by-time blob directory: `<root>/YYYY/MM/DD/<source>_<HHMMSS>_<rand>.<ext>`.
/// Directories are created lazily; the root gets mode 0700 on unix the first
/// time it is created, mirroring the teacher's `ScreenshotStore`.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating blob root {:?}", self.root))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&self.root, perms)?;
        }
        Ok(())
    }

    fn day_dir(&self) -> PathBuf {
        let now = Local::now();
        self.root
            .join(format!("{:04}", now.format("%Y")))
            .join(format!("{:02}", now.format("%m")))
            .join(format!("{:02}", now.format("%d")))
    }

    /// Write `data` as a new blob for `source`, returning the path relative
    /// to nothing (an absolute path, as the Store records it verbatim).
    pub fn write(&self, source: Source, ext: &str, data: &[u8]) -> Result<PathBuf> {
        self.ensure_root()?;
        let dir = self.day_dir();
        std::fs::create_dir_all(&dir)?;
        let now = Utc::now();
        let rand_suffix: u32 = rand::thread_rng().gen_range(0..0xFFFF);
        let filename = format!(
            "{}_{}_{:04x}.{}",
            source.as_str(),
            now.format("%H%M%S"),
            rand_suffix,
            ext
        );
        let path = dir.join(filename);
        std::fs::write(&path, data)?;
        Ok(path)
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Whether `raw_data_path` on a capture is backed by a readable file,
    /// per the invariant in `spec.md` §3.
    pub fn exists(path: &str) -> bool {
        Path::new(path).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_under_date_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().to_path_buf());
        let path = store.write(Source::Screen, "jpg", b"fake-jpeg").unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().contains("screen_"));
        assert!(BlobStore::exists(&path.to_string_lossy()));
    }

    #[test]
    fn missing_blob_reports_false() {
        assert!(!BlobStore::exists("/no/such/path/file.jpg"));
    }
}
