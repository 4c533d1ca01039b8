mod api;
mod app;
mod cli;
mod config;
mod keycache;
mod paths;
mod session;
mod stream;
mod transcript;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use session::Session;
use transcript::ChatMessage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = cli::Args::parse();

    // Resolve and create dirs early.
    let config_dir = paths::config_dir()?;
    let _state_dir = paths::state_dir()?;

    let cfg = config::Config::load_optional(config_dir.join("config.toml"))?;
    tracing::debug!(?config_dir, ?cfg, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let api_base = app::resolve_api_base(cfg.as_ref(), args.api_base.as_deref());
    let api_key = app::resolve_api_key(cfg.as_ref(), args.api_key.as_deref());
    let params = app::resolve_params(cfg.as_ref(), &args);

    match &args.cmd {
        Some(cli::Command::Models) => {
            return app::cmd_models(&http, &api_base, &api_key).await;
        }
        Some(cli::Command::Keygen) => {
            return app::cmd_keygen(&http, &api_base).await;
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            return tui::run_tui(&args, params, &api_base, api_key).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: playground \"Hello\" or `playground tui`");
    }

    let streaming = params.stream && !params.json_mode;

    let backend_name = args.backend.as_deref().unwrap_or("openai");
    let backend = app::build_backend(&http, &api_base, backend_name)?;

    let mut session = Session::new(params);
    session.system_prompt = args.system.clone().unwrap_or_default();
    session.transcript.push(ChatMessage::user(prompt));

    session
        .submit(backend.as_ref(), &api_key, |delta| {
            use std::io::Write;
            print!("{delta}");
            std::io::stdout().flush().ok();
        })
        .await;

    if streaming {
        println!();
    } else if let Some(last) = session.transcript.last() {
        println!("{}", last.content);
    }

    // Errors surface inside the transcript; make them visible on a stream
    // that printed nothing.
    if streaming {
        if let Some(last) = session.transcript.last() {
            if last.content.starts_with("An error occurred:")
                || last.content.starts_with("Please enter an API key")
            {
                eprintln!("{}", last.content);
            }
        }
    }

    tracing::debug!(
        prompt_tokens = session.usage.prompt_tokens,
        completion_tokens = session.usage.completion_tokens,
        total_tokens = session.usage.total_tokens,
        "token usage"
    );

    Ok(())
}
