use clap::{Parser, Subcommand};

/// Chat API playground
#[derive(Debug, Parser)]
#[command(name = "playground")]
#[command(version)]
#[command(about = "Playground for an OpenAI-compatible chat completion API", long_about = None)]
pub struct Args {
    /// Model id
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// API base URL (default: config/api_base or http://localhost:5000)
    #[arg(long = "api-base")]
    pub api_base: Option<String>,

    /// API key (default: config/api_key, then the cached key)
    #[arg(long = "api-key")]
    pub api_key: Option<String>,

    /// System prompt for this conversation
    #[arg(long = "system")]
    pub system: Option<String>,

    /// Disable streaming and wait for the whole reply
    #[arg(long = "no-stream")]
    pub no_stream: bool,

    /// Request a JSON object response (implies --no-stream)
    #[arg(long = "json")]
    pub json: bool,

    #[arg(long = "temperature")]
    pub temperature: Option<f64>,

    #[arg(long = "top-p")]
    pub top_p: Option<f64>,

    #[arg(long = "max-tokens")]
    pub max_tokens: Option<u32>,

    /// Backend ("openai" or "stub")
    #[arg(long = "backend")]
    pub backend: Option<String>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List models offered by the backend
    Models,

    /// Issue a new API key and cache it locally
    Keygen,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
