use std::path::{Path, PathBuf};

use serde::Serialize;

/// Mirrors the focus session state shown in a UI widget, per `spec.md`
/// §6. Replaced atomically (write to a temp file, then rename) so a
/// reader never observes a partial write.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetState {
    pub active: bool,
    pub mode_name: Option<String>,
    pub elapsed_secs: u64,
    pub blocks_count: u32,
    pub last_decision: Option<String>,
    pub last_action: Option<String>,
}

impl WidgetState {
    pub fn inactive() -> Self {
        Self {
            active: false,
            mode_name: None,
            elapsed_secs: 0,
            blocks_count: 0,
            last_decision: None,
            last_action: None,
        }
    }
}

pub fn widget_path(data_dir: &Path) -> PathBuf {
    data_dir.join("focus_widget.json")
}

/// Serializes `state` and replaces `path` atomically via a same-directory
/// temp file plus rename, so concurrent readers never see a torn write.
pub fn write_widget_state(path: &Path, state: &WidgetState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_vec_pretty(state)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = widget_path(dir.path());

        write_widget_state(&path, &WidgetState::inactive()).unwrap();
        let first: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(first["active"], false);

        let active = WidgetState {
            active: true,
            mode_name: Some("Deep Work".into()),
            elapsed_secs: 120,
            blocks_count: 2,
            last_decision: Some("block".into()),
            last_action: Some("warn".into()),
        };
        write_widget_state(&path, &active).unwrap();
        let second: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(second["mode_name"], "Deep Work");
    }
}
