use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn registry_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/registry.log")
}

/// Appends one JSON line to the registry audit log. Best-effort: failures are
/// reported through `tracing` and otherwise ignored.
pub fn append_registry_log(state_root: &Path, level: &str, event: &str, message: &str) {
    let payload = serde_json::json!({
        "timestamp": chrono::Utc::now().timestamp(),
        "level": level,
        "event": event,
        "message": message,
    });

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };

    let path = registry_log_path(state_root);
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            tracing::debug!(path = %parent.display(), error = %err, "registry log dir unavailable");
            return;
        }
    }
    let result = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| writeln!(file, "{line}"));
    if let Err(err) = result {
        tracing::debug!(path = %path.display(), error = %err, "registry log append failed");
    }
}
