//! Interactive REPL for the search chat
//!
//! Reads one line per turn and hands it to the agent loop. A few bare words
//! control the session instead of being sent to the model.

use std::io::{stdout, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use llm_core::{ChatClient, RetryConfig};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{
    AgentConfig, AgentLoop, FinishReason, LoopPhase, MessageStore, ModelInvoker, TurnEvent,
    TurnObserver, TurnOutcome,
};
use crate::config::Settings;
use crate::graph::{AgentGraph, CHATBOT, END, TOOLS};
use crate::tools::builtin::create_default_registry;
use crate::tools::{ToolContext, ToolRouter};

// ANSI colors
const GREEN: &str = "\x1b[92m";
const BLUE: &str = "\x1b[94m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Characters of tool output shown in debug mode
const DEBUG_PREVIEW_CHARS: usize = 500;

/// What a line of input asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Clear,
    ToggleFlow,
    ToggleDebug,
    Empty,
    Message(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "" => ReplCommand::Empty,
            "exit" | "quit" => ReplCommand::Exit,
            "clear" => ReplCommand::Clear,
            "flow" => ReplCommand::ToggleFlow,
            "debug" => ReplCommand::ToggleDebug,
            _ => ReplCommand::Message(trimmed.to_string()),
        }
    }
}

/// Default system message, stamped with the current time
pub fn system_preamble(now: DateTime<Local>) -> String {
    format!(
        "The current time is {}. You are a helpful assistant that can use a web search tool \
         to look up recent or uncertain information. Search when the question needs current \
         facts, then answer concisely and cite the sources you used.",
        now.format("%Y-%m-%d %H:%M:%S %Z")
    )
}

/// Build the agent loop described by `settings`
pub fn build_agent(settings: &Settings) -> Result<AgentLoop<ChatClient>> {
    let client = ChatClient::new(settings.model.clone()).context("Failed to create model client")?;
    let registry = create_default_registry(settings)?;
    if registry.is_empty() {
        warn!("No tools enabled; the model can only answer from memory");
    }
    info!(tools = registry.len(), names = ?registry.list_names(), model = %settings.model.name, "Agent ready");

    let ctx = ToolContext::default().with_timeout(settings.agent.tool_timeout());
    let router = ToolRouter::new(Arc::new(registry), ctx)
        .with_retry(RetryConfig::default().with_max_retries(settings.agent.tool_retries));

    Ok(AgentLoop::new(client, router, AgentConfig::from_settings(settings)))
}

/// One conversation: the loop, its history, and display toggles
pub struct Session<M> {
    agent: AgentLoop<M>,
    store: MessageStore,
    system_prompt: Option<String>,
    flow: bool,
    debug: bool,
}

impl<M: ModelInvoker> Session<M> {
    pub fn new(agent: AgentLoop<M>, system_prompt: Option<String>) -> Self {
        let mut session = Self {
            agent,
            store: MessageStore::new(),
            system_prompt,
            flow: false,
            debug: false,
        };
        session.clear();
        session
    }

    pub fn with_flow(mut self, flow: bool) -> Self {
        self.flow = flow;
        self
    }

    /// Reset history, re-stamping the default preamble
    pub fn clear(&mut self) {
        let preamble = self
            .system_prompt
            .clone()
            .unwrap_or_else(|| system_preamble(Local::now()));
        self.store.set_preamble(Some(preamble));
        self.store.reset();
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Run one turn; Ctrl-C cancels it
    pub async fn send(&mut self, input: &str) -> Result<TurnOutcome> {
        let spinner = (!self.flow).then(thinking_spinner);
        let printer = TurnPrinter {
            flow: self.flow,
            debug: self.debug,
            spinner: spinner.clone(),
        };

        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let outcome = self.agent.submit(&mut self.store, input, &printer, &cancel).await;
        watcher.abort();
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        Ok(outcome?)
    }

    /// Handle one line; returns false when the session should end
    pub async fn handle_line(&mut self, line: &str) -> bool {
        match ReplCommand::parse(line) {
            ReplCommand::Empty => {}
            ReplCommand::Exit => return false,
            ReplCommand::Clear => {
                self.clear();
                println!("{}Conversation cleared.{}", DIM, RESET);
            }
            ReplCommand::ToggleFlow => {
                self.flow = !self.flow;
                println!("{}Flow tracing {}.{}", DIM, on_off(self.flow), RESET);
            }
            ReplCommand::ToggleDebug => {
                self.debug = !self.debug;
                println!("{}Tool output {}.{}", DIM, on_off(self.debug), RESET);
            }
            ReplCommand::Message(text) => match self.send(&text).await {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => eprintln!("{}Error:{} {:#}", YELLOW, RESET, e),
            },
        }
        true
    }
}

/// Run the interactive REPL
pub async fn run(settings: Settings, flow: bool, export_graph: bool) -> Result<()> {
    let agent = build_agent(&settings)?;

    if export_graph {
        let files = AgentGraph::agent().export(Path::new("."), true).await;
        if let Some(path) = files.mermaid {
            debug!(path = %path.display(), "Exported graph");
        }
    }

    let mut session = Session::new(agent, settings.agent.system_prompt.clone()).with_flow(flow);
    let mut rl = DefaultEditor::new()?;

    print_welcome(&settings);

    loop {
        let prompt = format!("{}User:{} ", CYAN, RESET);

        match rl.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = rl.add_history_entry(line.trim());
                }
                if !session.handle_line(&line).await {
                    println!("{}Goodbye!{}", DIM, RESET);
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}^C (type exit to quit){}", DIM, RESET);
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("{}Goodbye!{}", DIM, RESET);
                break;
            }
            Err(e) => {
                eprintln!("{}Error:{} {}", YELLOW, RESET, e);
                break;
            }
        }
    }

    Ok(())
}

/// One-shot question
pub async fn ask(settings: Settings, prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt given");
    }
    let agent = build_agent(&settings)?;
    let mut session = Session::new(agent, settings.agent.system_prompt.clone());

    let outcome = session.send(prompt).await?;
    if !outcome.is_answered() {
        warn!(reason = ?outcome.finish_reason, "Turn ended without a model answer");
    }
    println!("{}", outcome.answer);
    Ok(())
}

fn print_welcome(settings: &Settings) {
    println!();
    println!("{}╭─────────────────────────────────────────╮{}", DIM, RESET);
    println!("{}│{} {}search-chat{} - chat with web search", DIM, RESET, BOLD, RESET);
    println!("{}│{} Model: {}{}{}", DIM, RESET, BLUE, settings.model.name, RESET);
    println!(
        "{}│{} Commands: {}exit quit clear flow debug{}",
        DIM, RESET, CYAN, RESET
    );
    println!("{}╰─────────────────────────────────────────╯{}", DIM, RESET);
    println!();
}

fn print_outcome(outcome: &TurnOutcome) {
    match outcome.finish_reason {
        FinishReason::Answered => println!("{}Assistant:{} {}", GREEN, RESET, outcome.answer),
        FinishReason::Interrupted => println!("{}Interrupted.{}", YELLOW, RESET),
        FinishReason::RoundLimit | FinishReason::ModelFailed => {
            println!("{}Assistant:{} {}{}{}", GREEN, RESET, YELLOW, outcome.answer, RESET)
        }
    }
    let _ = stdout().flush();
}

fn thinking_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message("Thinking...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

/// Prints loop events according to the flow/debug toggles
struct TurnPrinter {
    flow: bool,
    debug: bool,
    spinner: Option<ProgressBar>,
}

impl TurnObserver for TurnPrinter {
    fn on_event(&self, event: &TurnEvent) {
        let lines = render_event(event, self.flow, self.debug);
        if lines.is_empty() {
            return;
        }
        let print = || {
            for line in &lines {
                println!("{}", line);
            }
        };
        match &self.spinner {
            Some(spinner) => spinner.suspend(print),
            None => print(),
        }
    }
}

/// Terminal lines for one event
fn render_event(event: &TurnEvent, flow: bool, debug: bool) -> Vec<String> {
    let mut lines = Vec::new();
    match event {
        TurnEvent::ToolFinished { tool, content, .. } if debug => {
            lines.push(format!("{}[{} output]{}", DIM, tool, RESET));
            lines.push(preview(content, DEBUG_PREVIEW_CHARS));
        }
        _ => {}
    }
    if !flow {
        return lines;
    }

    let flow_line = match event {
        TurnEvent::PhaseChanged(phase) => {
            let node = match phase {
                LoopPhase::AwaitingModel => CHATBOT,
                LoopPhase::AwaitingTools => TOOLS,
                LoopPhase::Done => END,
            };
            format!("→ {} ({})", node, phase)
        }
        TurnEvent::ModelRequest {
            round,
            attempt,
            messages,
        } => format!("model request: round {}, attempt {}, {} messages", round, attempt + 1, messages),
        TurnEvent::ModelRetry { delay, error, .. } => {
            format!("{}model failed ({}), retrying in {:?}{}", YELLOW, error, delay, DIM)
        }
        TurnEvent::InterimContent(content) => format!("assistant: {}", preview(content, 200)),
        TurnEvent::ToolStarted(call) => format!("tool call: {}({})", call.name(), call.arguments_text()),
        TurnEvent::ToolFinished {
            tool,
            success,
            content,
            ..
        } => format!(
            "tool {}: {} ({} chars)",
            tool,
            if *success { "ok" } else { "failed" },
            content.chars().count()
        ),
        TurnEvent::RoundLimit { limit, skipped } => {
            format!("{}round limit {} reached, skipped {} call(s){}", YELLOW, limit, skipped, DIM)
        }
        TurnEvent::Interrupted(phase) => format!("interrupted in {}", phase),
    };
    lines.push(format!("{}[flow] {}{}", DIM, flow_line, RESET));
    lines
}

fn preview(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}
