//! # chatline-cli
//!
//! Terminal front end: argument types, the terminal [`ChatView`], the chat
//! REPL and the one-shot `generate` and `models` commands. `main.rs` only
//! parses arguments and wires these together.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use futures::{Stream, StreamExt};
use chatline_engine::{ChatError, FailureKind, Transport};
use chatline_models::ModelRegistry;
use chatline_runtime::{SpeedConfig, SpeedReport, SpeedUnit};
use chatline_session::{
    ChatView, Controller, DialogueMode, SessionPolicy, StopHandle, Turn, FEW_SHOT_EXAMPLE,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub const DEFAULT_URL: &str = "ws://localhost:8000";

/// Options of the `chat` command.
#[derive(Debug, Clone, clap::Args)]
pub struct ChatArgs {
    /// Model key or alias (defaults to the registry default).
    #[arg(short, long)]
    pub model: Option<String>,

    /// Few-shot mode: no speaker labels, you write the whole prompt.
    #[arg(long)]
    pub few_shot: bool,

    #[command(flatten)]
    pub session: SessionArgs,
}

/// Session and speed options shared by `chat` and `generate`.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionArgs {
    /// Token budget of the first inference session.
    #[arg(long, visible_alias = "max-length", default_value_t = 1024)]
    pub initial_length: usize,

    /// Budget multiplier applied when the backend reports the session is full.
    #[arg(long, default_value_t = 4.0)]
    pub growth_factor: f64,

    /// Automatic retries allowed per turn.
    #[arg(long, default_value_t = 8)]
    pub max_auto_retries: usize,

    /// Speed unit: sec-per-token or tokens-per-sec.
    #[arg(long, default_value = "sec-per-token")]
    pub speed_unit: SpeedUnit,

    /// Speed at which to suggest contributing capacity (in --speed-unit).
    #[arg(long)]
    pub slow_threshold: Option<f64>,
}

impl SessionArgs {
    pub fn policy(&self, mode: DialogueMode) -> SessionPolicy {
        let mut speed = SpeedConfig::new(self.speed_unit);
        if let Some(threshold) = self.slow_threshold {
            speed = speed.with_slow_threshold(threshold);
        }
        SessionPolicy::default()
            .with_initial_max_length(self.initial_length)
            .with_growth_factor(self.growth_factor)
            .with_max_auto_retries(self.max_auto_retries)
            .with_speed(speed)
            .with_mode(mode)
    }
}

impl ChatArgs {
    pub fn policy(&self) -> SessionPolicy {
        let mode = if self.few_shot {
            DialogueMode::FewShot
        } else {
            DialogueMode::Chatbot
        };
        self.session.policy(mode)
    }
}

/// Load the registry from `path`, or the built-in presets.
pub fn load_registry(path: Option<&PathBuf>) -> anyhow::Result<ModelRegistry> {
    match path {
        Some(path) => ModelRegistry::load(path)
            .with_context(|| format!("failed to load models from {}", path.display())),
        None => Ok(ModelRegistry::builtin()?),
    }
}

/// Streams the dialogue to a terminal.
///
/// Text goes to `out` as it arrives. Speed is remembered and printed once the
/// turn finishes, with the capacity hint when it was slow.
pub struct TerminalView<W: Write + Send> {
    out: W,
    model_name: String,
    shown: String,
    speed: Option<SpeedReport>,
}

impl<W: Write + Send> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            model_name: String::new(),
            shown: String::new(),
            speed: None,
        }
    }

    pub fn set_model_name(&mut self, name: &str) {
        self.model_name = name.to_string();
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

// Terminal write failures are not worth aborting a generation over.
impl<W: Write + Send> ChatView for TerminalView<W> {
    fn on_turn_started(&mut self, turn: &Turn) {
        self.shown.clear();
        self.speed = None;
        let _ = write!(self.out, "{}", turn.prefix);
        let _ = self.out.flush();
    }

    fn on_text(&mut self, text: &str, _fragment: &str) {
        // Stripping a stop sequence can shorten the text; what was already
        // printed stays.
        if let Some(delta) = text.strip_prefix(self.shown.as_str()) {
            let _ = write!(self.out, "{delta}");
            let _ = self.out.flush();
            self.shown = text.to_string();
        }
    }

    fn on_speed(&mut self, report: &SpeedReport) {
        self.speed = Some(*report);
    }

    fn on_turn_finished(&mut self, _turn: &Turn, stopped_by_user: bool) {
        let _ = writeln!(self.out);
        if stopped_by_user {
            let _ = writeln!(self.out, "[stopped]");
        }
        if let Some(report) = self.speed.take() {
            let _ = writeln!(self.out, "[Speed: {report}, model: {}]", self.model_name);
            if report.slow {
                let _ = writeln!(
                    self.out,
                    "[This is slow. Consider contributing your GPU to the swarm to speed it up.]"
                );
            }
        }
    }

    fn on_retry(&mut self, kind: FailureKind, attempt: usize) {
        tracing::debug!(?kind, attempt, "retrying");
    }

    fn on_error(&mut self, error: &ChatError, kind: FailureKind) {
        let _ = writeln!(self.out);
        if kind == FailureKind::Overloaded {
            let _ = writeln!(
                self.out,
                "The swarm is overloaded right now. Try again later or contribute your GPU to add capacity."
            );
            let _ = writeln!(self.out, "({error})");
        } else {
            let _ = writeln!(self.out, "error: {error}");
        }
        let _ = writeln!(self.out, "Type /retry to try again or /reset to start over.");
    }
}

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Say(String),
    Retry,
    Reset,
    Model(String),
    Models,
    Example,
    Help,
    Quit,
    Unknown(String),
}

impl ReplCommand {
    /// Parse one input line; `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Some(ReplCommand::Say(line.trim_end_matches(['\r', '\n']).to_string()));
        };
        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        Some(match (name, arg) {
            ("retry", _) => ReplCommand::Retry,
            ("reset", _) => ReplCommand::Reset,
            ("model", id) if !id.is_empty() => ReplCommand::Model(id.to_string()),
            ("models", _) => ReplCommand::Models,
            ("example", _) => ReplCommand::Example,
            ("help", _) => ReplCommand::Help,
            ("quit" | "exit", _) => ReplCommand::Quit,
            _ => ReplCommand::Unknown(trimmed.to_string()),
        })
    }
}

const HELP: &str = "\
Type a message and press Enter. End a line with \\ to continue on the next one.
Ctrl-C stops the reply being written. Press it twice at the prompt to leave.
  /retry        retry after an error
  /reset        start a new dialogue
  /model ID     switch model
  /models       list models
  /example      send the few-shot example prompt
  /quit         leave";

/// Read one message, joining lines that end with a backslash.
async fn read_message<R: AsyncBufRead + Unpin>(input: &mut R) -> std::io::Result<Option<String>> {
    let mut message = String::new();
    loop {
        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            return Ok((!message.is_empty()).then_some(message));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        match line.strip_suffix('\\') {
            Some(head) => {
                message.push_str(head);
                message.push('\n');
            }
            None => {
                message.push_str(line);
                return Ok(Some(message));
            }
        }
    }
}

/// Run the interactive chat loop until `/quit` or end of input.
pub async fn run_chat<T, W, R>(
    controller: &mut Controller<T, TerminalView<W>>,
    mut input: R,
) -> anyhow::Result<()>
where
    T: Transport,
    W: Write + Send,
    R: AsyncBufRead + Unpin,
{
    let name = controller.model().name().to_string();
    controller.view_mut().set_model_name(&name);
    writeln!(controller.view_mut().writer(), "Chatting with {name}. /help for commands.")?;

    while let Some(line) = read_message(&mut input).await? {
        let Some(command) = ReplCommand::parse(&line) else {
            continue;
        };
        let out_of_turn = match command {
            ReplCommand::Say(text) => controller.submit(&text).await.err(),
            ReplCommand::Example => controller.submit(FEW_SHOT_EXAMPLE).await.err(),
            ReplCommand::Retry => match controller.retry().await {
                Err(ChatError::NothingToRetry) => Some(ChatError::NothingToRetry),
                _ => None,
            },
            ReplCommand::Reset => {
                controller.reset().await;
                writeln!(controller.view_mut().writer(), "[new dialogue]")?;
                None
            }
            ReplCommand::Model(id) => match controller.switch_model(&id).await {
                Ok(()) => {
                    let name = controller.model().name().to_string();
                    controller.view_mut().set_model_name(&name);
                    writeln!(controller.view_mut().writer(), "[switched to {name}]")?;
                    None
                }
                Err(e) => Some(e),
            },
            ReplCommand::Models => {
                let registry = controller.registry().clone();
                list_models(&registry, controller.view_mut().writer())?;
                None
            }
            ReplCommand::Help => {
                writeln!(controller.view_mut().writer(), "{HELP}")?;
                None
            }
            ReplCommand::Quit => break,
            ReplCommand::Unknown(text) => {
                writeln!(controller.view_mut().writer(), "unknown command: {text}")?;
                None
            }
        };
        // Failures inside a turn were already shown by the view.
        if let Some(err) = out_of_turn {
            if matches!(err, ChatError::Busy | ChatError::NothingToRetry | ChatError::UnknownModel(_)) {
                writeln!(controller.view_mut().writer(), "{err}")?;
            }
        }
    }
    controller.reset().await;
    Ok(())
}

/// Turn interrupts into stop requests.
///
/// A running turn consumes the request at its next response. An interrupt
/// arriving while the previous request is still pending means nothing is
/// generating, so it resolves to `true` and the caller should quit. Resolves
/// to `false` when the interrupt source ends.
pub async fn forward_interrupts<S>(mut interrupts: S, stop: StopHandle) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    while interrupts.next().await.is_some() {
        if stop.is_requested() {
            tracing::debug!("interrupted at the prompt");
            return true;
        }
        tracing::debug!("stop requested");
        stop.request_stop();
    }
    false
}

/// Spawn a task that turns Ctrl-C into stop requests; see
/// [`forward_interrupts`].
pub fn spawn_interrupt_handler(stop: StopHandle) -> tokio::task::JoinHandle<bool> {
    let ctrl_c = futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    });
    tokio::spawn(forward_interrupts(Box::pin(ctrl_c), stop))
}

/// Complete `prompt` once, streaming the reply to the view.
pub async fn run_generate<T, W>(
    controller: &mut Controller<T, TerminalView<W>>,
    prompt: &str,
) -> anyhow::Result<String>
where
    T: Transport,
    W: Write + Send,
{
    let name = controller.model().name().to_string();
    controller.view_mut().set_model_name(&name);
    let outcome = controller.submit(prompt).await;
    controller.reset().await;
    match outcome {
        Ok(outcome) => Ok(outcome.text),
        Err(e) => bail!("generation failed: {e}"),
    }
}

/// Print the registry grouped by family.
pub fn list_models<W: Write>(registry: &ModelRegistry, out: &mut W) -> std::io::Result<()> {
    let default = registry.default_model().key();
    for family in registry.families() {
        writeln!(out, "{}", family.name)?;
        for model in &family.models {
            let marker = if model.key() == default { "*" } else { " " };
            write!(
                out,
                " {marker} {:<36} {:<28} max {}",
                model.key(),
                model.name(),
                model.chat.max_session_length
            )?;
            if !model.backend.aliases.is_empty() {
                write!(out, "  (aka {})", model.backend.aliases.join(", "))?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}
