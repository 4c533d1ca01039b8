use crate::api::openai::OpenAiClient;
use crate::api::stub::StubBackend;
use crate::api::ChatBackend;
use crate::session::Params;
use crate::{cli, config, keycache, paths};
use anyhow::Context;

pub const DEFAULT_API_BASE: &str = "http://localhost:5000";

pub fn resolve_api_base(cfg: Option<&config::Config>, arg: Option<&str>) -> String {
    arg.map(str::to_string)
        .or_else(|| std::env::var("PLAYGROUND_API_BASE").ok())
        .or_else(|| cfg.and_then(|c| c.api_base.clone()))
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
}

/// Flag, then env, then config, then the local cache. A freshly supplied key
/// is written back to the cache; cache failures are logged and ignored.
pub fn resolve_api_key(cfg: Option<&config::Config>, arg: Option<&str>) -> String {
    let cached = paths::api_key_path()
        .and_then(keycache::load_key)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read cached API key");
            None
        });

    let key = arg
        .map(str::to_string)
        .or_else(|| std::env::var("PLAYGROUND_API_KEY").ok())
        .or_else(|| cfg.and_then(|c| c.api_key.clone()))
        .or_else(|| cached.clone())
        .unwrap_or_default();

    if !key.is_empty() && cached.as_deref() != Some(key.as_str()) {
        persist_key(&key);
    }
    key
}

pub fn persist_key(key: &str) {
    match paths::api_key_path().and_then(|p| keycache::save_key_atomic(p, key)) {
        Ok(()) => tracing::debug!("API key cached"),
        Err(e) => tracing::warn!(error = %e, "could not cache API key"),
    }
}

/// Request knobs: flags win over config, config over the form defaults.
pub fn resolve_params(cfg: Option<&config::Config>, args: &cli::Args) -> Params {
    Params {
        model: args
            .model
            .clone()
            .or_else(|| cfg.and_then(|c| c.model.clone()))
            .unwrap_or_else(|| "default".to_string()),
        stream: !args.no_stream && !args.json && cfg.and_then(|c| c.stream).unwrap_or(true),
        json_mode: args.json,
        temperature: args
            .temperature
            .or_else(|| cfg.and_then(|c| c.temperature))
            .unwrap_or(0.7),
        top_p: args
            .top_p
            .or_else(|| cfg.and_then(|c| c.top_p))
            .unwrap_or(1.0),
        max_tokens: args
            .max_tokens
            .or_else(|| cfg.and_then(|c| c.max_tokens))
            .unwrap_or(2048),
    }
}

pub fn build_backend(
    http: &reqwest::Client,
    api_base: &str,
    backend_name: &str,
) -> anyhow::Result<Box<dyn ChatBackend>> {
    match backend_name {
        "openai" => {
            let client = OpenAiClient::new(http.clone(), api_base)
                .with_context(|| format!("bad api base: {api_base}"))?;
            Ok(Box::new(client))
        }
        "stub" => Ok(Box::new(StubBackend::new())),
        other => anyhow::bail!("unknown backend: {other}"),
    }
}

/// `playground models` — the CLI analogue of the model selector.
pub async fn cmd_models(
    http: &reqwest::Client,
    api_base: &str,
    api_key: &str,
) -> anyhow::Result<()> {
    let client = OpenAiClient::new(http.clone(), api_base)?;
    let list = client
        .list_models(api_key)
        .await
        .context("failed to fetch models")?;

    if list.data.is_empty() {
        println!("(no models advertised)");
        return Ok(());
    }

    for m in &list.data {
        let owner = m.owned_by.as_deref().unwrap_or("unknown");
        match m.price {
            Some(p) => println!(
                "{:<24} owner: {:<12} price: {}/{} per 1M tokens",
                m.id, owner, p.prompt, p.completion
            ),
            None => println!("{:<24} owner: {owner}", m.id),
        }
        if let Some(d) = &m.description {
            println!("    {d}");
        }
        if let Some(s) = &m.strengths {
            println!("    strengths: {s}");
        }
    }
    Ok(())
}

/// `playground keygen` — issue a key and cache it for later runs.
pub async fn cmd_keygen(http: &reqwest::Client, api_base: &str) -> anyhow::Result<()> {
    let client = OpenAiClient::new(http.clone(), api_base)?;
    let issued = client
        .create_api_key()
        .await
        .context("failed to generate API key")?;

    persist_key(&issued.api_key);
    println!("{}", issued.api_key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use clap::Parser;

    #[test]
    fn flags_override_config_for_params() {
        let args = cli::Args::parse_from([
            "playground",
            "--temperature",
            "0.2",
            "--max-tokens",
            "512",
            "hello",
        ]);
        let cfg = Config {
            model: Some("cfg-model".into()),
            temperature: Some(0.9),
            top_p: Some(0.5),
            ..Default::default()
        };

        let params = resolve_params(Some(&cfg), &args);
        assert_eq!(params.model, "cfg-model");
        assert_eq!(params.temperature, 0.2);
        assert_eq!(params.top_p, 0.5);
        assert_eq!(params.max_tokens, 512);
        assert!(params.stream);
    }

    #[test]
    fn json_flag_disables_streaming() {
        let args = cli::Args::parse_from(["playground", "--json", "hello"]);
        let params = resolve_params(None, &args);
        assert!(params.json_mode);
        assert!(!params.stream);
    }
}
