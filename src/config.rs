use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Return the app-specific data directory without touching the parent
/// directory, following the same macOS/TCC-aware construction the teacher
/// project uses to avoid an "access data from other apps" prompt.
pub fn app_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("mnemosyne");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Some(dir) = dirs::data_local_dir() {
            return dir.join("mnemosyne");
        }
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        if let Some(dir) = dirs::data_local_dir() {
            return dir.join("mnemosyne");
        }
    }
    PathBuf::from(".").join("mnemosyne")
}

fn app_config_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("mnemosyne");
        }
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("mnemosyne");
    }
    PathBuf::from(".").join("mnemosyne")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub api_key: String,
    pub api_endpoint: String,
    pub chat_model: String,
    pub ocr_vision_model: String,
    pub ocr_compress_model: String,
    pub summary_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            api_key: String::new(),
            api_endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            chat_model: "openai/gpt-4o-mini".to_string(),
            ocr_vision_model: "openai/gpt-4o-mini".to_string(),
            ocr_compress_model: "openai/gpt-4o-mini".to_string(),
            summary_model: "openai/gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    pub enabled: bool,
    pub desktop_notifications: bool,
    pub batch_interval_minutes: u64,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop_notifications: true,
            batch_interval_minutes: 30,
        }
    }
}

/// The subset of the configuration schema (`spec.md` §6) relevant to the
/// core. Loading this file from disk is out of scope per `spec.md` §1 —
/// this struct is the typed shape an external loader populates. Unknown
/// keys are ignored by serde's default derive behavior when parsed via
/// [`AppConfig::from_toml_str`]; absent keys take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture_interval_seconds: u64,
    pub screen_capture_enabled: bool,
    pub window_capture_enabled: bool,
    pub git_capture_enabled: bool,
    pub git_repo_paths: Vec<String>,
    pub clipboard_capture_enabled: bool,
    pub blocked_apps: Vec<String>,
    pub blocked_urls: Vec<String>,
    pub blocked_keywords: Vec<String>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    pub llm: LlmConfig,
    pub insights: InsightsConfig,
    pub storage_path: String,

    // Cadence knobs named in spec.md §4.3, not part of the subset in §6 but
    // required to drive the scheduler.
    pub window_interval_secs: u64,
    pub screen_interval_secs: u64,
    pub git_interval_secs: u64,
    pub activity_interval_secs: u64,
    pub biometrics_interval_secs: u64,
    pub dedup_hash_threshold: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = app_data_dir().join("data");
        Self {
            capture_interval_seconds: 10,
            screen_capture_enabled: true,
            window_capture_enabled: true,
            git_capture_enabled: true,
            git_repo_paths: Vec::new(),
            clipboard_capture_enabled: true,
            blocked_apps: Vec::new(),
            blocked_urls: Vec::new(),
            blocked_keywords: Vec::new(),
            quiet_hours_start: None,
            quiet_hours_end: None,
            llm: LlmConfig::default(),
            insights: InsightsConfig::default(),
            storage_path: data_dir.to_string_lossy().to_string(),
            window_interval_secs: 10,
            screen_interval_secs: 60,
            git_interval_secs: 300,
            activity_interval_secs: 1,
            biometrics_interval_secs: 10,
            dedup_hash_threshold: 5,
        }
    }
}

impl AppConfig {
    pub fn config_path() -> PathBuf {
        app_config_dir().join("config.toml")
    }

    pub fn digest_prompt_path() -> PathBuf {
        app_config_dir().join("summary_prompt.txt")
    }

    /// Load from the documented path if present, else fall back to defaults
    /// and persist them so subsequent edits have something to start from.
    /// Mirrors the teacher's `AppConfig::load`.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(Self::from_toml_str(&contents)?)
        } else {
            let config = AppConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_ignored() {
        let toml = r#"
            capture_interval_seconds = 30
            some_future_key = "ignored"

            [llm]
            chat_model = "claude-3"
        "#;
        let cfg = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.capture_interval_seconds, 30);
        assert_eq!(cfg.llm.chat_model, "claude-3");
        // absent keys take documented defaults
        assert_eq!(cfg.screen_interval_secs, 60);
    }

    #[test]
    fn absent_file_uses_defaults() {
        let cfg = AppConfig::default();
        assert!(cfg.screen_capture_enabled);
        assert_eq!(cfg.insights.batch_interval_minutes, 30);
    }
}
