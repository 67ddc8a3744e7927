use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chatline_cli::{
    list_models, load_registry, run_chat, run_generate, spawn_interrupt_handler, ChatArgs,
    SessionArgs, TerminalView, DEFAULT_URL,
};
use chatline_runtime::{Endpoint, LogTelemetry, TransportKind};
use chatline_session::{Controller, DialogueMode};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// chatline: chat with large language models served by a distributed backend
#[derive(Parser)]
#[command(name = "chatline", version)]
struct Cli {
    /// Backend endpoint (ws://, wss://, http:// or https://).
    #[arg(long, env = "CHATLINE_URL", default_value = DEFAULT_URL, global = true)]
    url: String,

    /// Force a transport instead of inferring it from the URL scheme.
    #[arg(long, global = true)]
    transport: Option<TransportKind>,

    /// TOML file with model families (defaults to the built-in presets).
    #[arg(long, global = true)]
    models: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat.
    Chat(ChatArgs),

    /// Complete a prompt once and print the result.
    Generate {
        /// Prompt text. The model's separator is appended unless the prompt
        /// already ends with it.
        #[arg(short, long)]
        prompt: String,

        /// Model key or alias.
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// List available models.
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = load_registry(cli.models.as_ref())?;

    let (model, policy) = match &cli.command {
        Command::Models => {
            list_models(&registry, &mut std::io::stdout())?;
            return Ok(());
        }
        Command::Chat(args) => (args.model.clone(), args.policy()),
        Command::Generate { model, session, .. } => {
            (model.clone(), session.policy(DialogueMode::FewShot))
        }
    };

    let endpoint = Endpoint::parse(&cli.url, cli.transport)
        .with_context(|| format!("invalid backend URL {}", cli.url))?;
    tracing::info!(endpoint = %endpoint, "using backend");

    let view = TerminalView::new(std::io::stdout());
    let mut controller = Controller::with_view(endpoint.connect(), registry, view, policy)
        .with_telemetry(Arc::new(LogTelemetry::new()));
    if let Some(id) = &model {
        controller.switch_model(id).await?;
    }
    let mut interrupts = spawn_interrupt_handler(controller.stop_handle());

    let run = async {
        match &cli.command {
            Command::Chat(_) => run_chat(&mut controller, BufReader::new(tokio::io::stdin())).await,
            Command::Generate { prompt, .. } => {
                run_generate(&mut controller, prompt).await.map(|_| ())
            }
            Command::Models => Ok(()),
        }
    };
    let finished = tokio::select! {
        result = run => Some(result),
        Ok(true) = &mut interrupts => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            println!();
            controller.reset().await;
            Ok(())
        }
    };
    interrupts.abort();
    result
}
