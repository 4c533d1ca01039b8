use anyhow::Context;
use std::env;
use std::path::{Path, PathBuf};

fn home_dir() -> anyhow::Result<PathBuf> {
    // Minimal cross-platform-ish fallback without extra deps.
    let home = env::var_os("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home))
}

fn ensure_dir(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))?;
    Ok(path.to_path_buf())
}

fn playground_home() -> Option<PathBuf> {
    env::var_os("PLAYGROUND_HOME").map(PathBuf::from)
}

pub fn config_dir() -> anyhow::Result<PathBuf> {
    if let Some(base) = playground_home() {
        return ensure_dir(&base.join("config"));
    }

    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME").map(PathBuf::from) {
        return ensure_dir(&xdg.join("playground"));
    }

    ensure_dir(&home_dir()?.join(".config").join("playground"))
}

pub fn state_dir() -> anyhow::Result<PathBuf> {
    if let Some(base) = playground_home() {
        return ensure_dir(&base.join("state"));
    }

    if let Some(xdg) = env::var_os("XDG_STATE_HOME").map(PathBuf::from) {
        return ensure_dir(&xdg.join("playground"));
    }

    ensure_dir(&home_dir()?.join(".local").join("state").join("playground"))
}

/// Where the cached API key lives; one fixed name per machine.
pub fn api_key_path() -> anyhow::Result<PathBuf> {
    Ok(state_dir()?.join("api_key.json"))
}
