//! Best-effort local persistence for the API key: read at startup, written
//! on every change. Not a secret store; no expiry, no encryption.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedKey {
    api_key: String,
}

pub fn load_key(path: impl AsRef<Path>) -> anyhow::Result<Option<String>> {
    let path = path.as_ref();
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(anyhow!(e))
                .with_context(|| format!("failed to read key cache: {}", path.display()))
        }
    };
    let cached: CachedKey = serde_json::from_slice(&bytes).context("failed to parse key cache JSON")?;
    Ok(Some(cached.api_key))
}

pub fn save_key_atomic(path: impl AsRef<Path>, api_key: &str) -> anyhow::Result<()> {
    let path = path.as_ref();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create key cache directory: {}", dir.display()))?;

    let tmp = tmp_path(path);
    let bytes = serde_json::to_vec_pretty(&CachedKey {
        api_key: api_key.to_string(),
    })
    .context("failed to serialize key cache")?;
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("failed to write temp key cache: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move key cache into place: {}", path.display()))?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut p = path.to_path_buf();
    let file = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "api_key.json".to_string());
    p.set_file_name(format!("{file}.tmp"));
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_cache_file() {
        let dir = std::env::temp_dir().join(format!("keycache-test-{}", std::process::id()));
        let path = dir.join("api_key.json");

        save_key_atomic(&path, "sk-cached").unwrap();
        assert_eq!(load_key(&path).unwrap().as_deref(), Some("sk-cached"));

        // Overwrite wins.
        save_key_atomic(&path, "sk-newer").unwrap();
        assert_eq!(load_key(&path).unwrap().as_deref(), Some("sk-newer"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("keycache-test-definitely-missing.json");
        assert!(load_key(&path).unwrap().is_none());
    }
}
