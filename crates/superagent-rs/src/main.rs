//! Compress a stored conversation from the command line.
//!
//! Reads a JSON array of messages, runs it through the compression
//! middleware, and writes the resulting messages as pretty JSON. Setting
//! `OPENROUTER_KEY` enables LLM summaries; without it the rule-based summary
//! is used.
//!
//! # Examples
//!
//! ```sh
//! # Compress only if over the model's threshold
//! superagent-compress --input chat.json --model claude-sonnet-4
//!
//! # Always compress, from stdin, with the rule-based summary
//! cat chat.json | superagent-compress --input - --force --mode lightweight
//!
//! # Inspect usage without compressing
//! superagent-compress --input chat.json --stats
//!
//! # Compress a stored session in place
//! superagent-compress --session chat-7f3a --sessions-dir .superagent/sessions
//! ```

use clap::Parser;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use superagent_rs::{Message, OpenRouterClient};
use superagent_rs::config::{CompressionConfig, CompressionMode, SummaryProvider};
use superagent_rs::context::{CompressionMiddleware, LoggingObserver, select_summarizer};
use superagent_rs::session::{FileSessionStore, SessionState, SessionStore};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Compress an agent conversation to fit its model's context window.
///
/// Reads the OpenRouter API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "superagent-compress", version)]
struct Cli {
    // ── Input ──────────────────────────────────────────────────
    /// Conversation JSON (array of messages); `-` reads stdin. With
    /// `--session`, only seeds a session that does not exist yet
    #[arg(long)]
    input: Option<String>,

    /// Load the conversation from this session and save the result back
    #[arg(long)]
    session: Option<String>,

    /// Root directory of the file session store
    #[arg(long, default_value = ".superagent/sessions")]
    sessions_dir: PathBuf,

    // ── Configuration ──────────────────────────────────────────
    /// JSON config file (camelCase keys); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Conversation model whose context window applies
    #[arg(long)]
    model: Option<String>,

    /// Summarization provider: openai, anthropic, google, xai
    #[arg(long)]
    provider: Option<SummaryProvider>,

    /// Summary effort: lightweight, auto, high-quality
    #[arg(long)]
    mode: Option<CompressionMode>,

    // ── Behavior ───────────────────────────────────────────────
    /// Compress even when under the threshold
    #[arg(long)]
    force: bool,

    /// Print context statistics and exit without compressing
    #[arg(long)]
    stats: bool,

    /// Write the result here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli)?;

    let session = match &cli.session {
        Some(id) => {
            let store = FileSessionStore::new(&cli.sessions_dir).map_err(|e| {
                format!(
                    "failed to open sessions dir {}: {e}",
                    cli.sessions_dir.display()
                )
            })?;
            let state = open_session(&store, id, cli.input.as_deref(), &config.model)?;
            Some((store, id.clone(), state))
        }
        None => None,
    };

    let messages = match &session {
        Some((_, _, state)) => state.messages.clone(),
        None => {
            let source = cli
                .input
                .as_deref()
                .ok_or("either --input or --session is required")?;
            read_messages(source)?
        }
    };
    debug!("Loaded {} messages", messages.len());

    let client = OpenRouterClient::from_env().map(Arc::new);
    if client.is_none() && config.compression_mode != CompressionMode::Lightweight {
        info!("OPENROUTER_KEY not set; using rule-based summaries");
    }
    let summarizer = select_summarizer(&config, client);
    let middleware = CompressionMiddleware::new(config.clone())
        .with_summarizer_opt(summarizer)
        .with_observer(LoggingObserver);

    if cli.stats {
        let stats = middleware.stats(&messages);
        info!("{}", stats.to_log_string());
        let json = serde_json::to_string_pretty(&stats)
            .map_err(|e| format!("failed to serialize stats: {e}"))?;
        return write_output(cli.output.as_ref(), &json);
    }

    let result = if cli.force {
        middleware.force_compress(messages).await
    } else {
        middleware.check_and_compress(messages).await
    };
    if !result.was_compressed {
        info!("Conversation left unchanged");
    }

    let output_messages = match session {
        Some((store, id, mut state)) => {
            state.model = config.model;
            state.apply(result);
            store
                .put(&id, &state)
                .map_err(|e| format!("failed to save session '{id}': {e}"))?;
            state.messages
        }
        None => result.messages,
    };

    let json = serde_json::to_string_pretty(&output_messages)
        .map_err(|e| format!("failed to serialize messages: {e}"))?;
    write_output(cli.output.as_ref(), &json)
}

/// Load session `id`, or seed it from `input` when it does not exist yet.
///
/// `--input` only seeds new sessions; passing it for an existing one is an
/// error rather than a silent no-op.
fn open_session(
    store: &impl SessionStore,
    id: &str,
    input: Option<&str>,
    model: &str,
) -> Result<SessionState, String> {
    let existing = store
        .get(id)
        .map_err(|e| format!("failed to load session '{id}': {e}"))?;
    match (existing, input) {
        (Some(_), Some(source)) => Err(format!(
            "session '{id}' already exists; refusing to ignore --input {source}"
        )),
        (Some(state), None) => Ok(state),
        (None, Some(source)) => Ok(SessionState::new(model, read_messages(source)?)),
        (None, None) => Err(format!("session '{id}' not found and no --input given")),
    }
}

fn load_config(cli: &Cli) -> Result<CompressionConfig, String> {
    let mut config = match &cli.config {
        Some(path) => CompressionConfig::from_file(path).map_err(|e| e.to_string())?,
        None => CompressionConfig::default(),
    };
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    if let Some(mode) = cli.mode {
        config.compression_mode = mode;
    }
    Ok(config)
}

fn read_messages(source: &str) -> Result<Vec<Message>, String> {
    let raw = if source == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        buf
    } else {
        std::fs::read_to_string(source).map_err(|e| format!("failed to read {source}: {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("failed to parse messages from {source}: {e}"))
}

fn write_output(path: Option<&PathBuf>, json: &str) -> Result<(), String> {
    match path {
        Some(path) => std::fs::write(path, format!("{json}\n"))
            .map_err(|e| format!("failed to write {}: {e}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{json}").map_err(|e| format!("failed to write stdout: {e}"))
        }
    }
}
