//! Terminal front end: argument parsing and the interactive practice REPL.

use crate::config::{Config, MODEL_ENV};
use crate::feedback::FeedbackReport;
use crate::persona::{self, Persona, INITIAL_GREETING};
use crate::session::{Phase, Session, SessionError, SessionEvent};
use crate::transcript::Author;
use anyhow::Result;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fmt::Write as _;
use std::future::Future;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "convocoach",
    version,
    about = "Practice conversations with AI roleplay personas and get feedback"
)]
pub struct Args {
    /// Config file (default: <config_dir>/convocoach/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Start with this persona (id or list number)
    #[arg(short, long)]
    pub persona: Option<String>,

    /// Model for both dialogue and analysis
    #[arg(short, long, env = MODEL_ENV)]
    pub model: Option<String>,

    /// Model for analysis only
    #[arg(long)]
    pub feedback_model: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    /// Sampling temperature for persona replies
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Args {
    /// Apply command-line overrides on top of file and environment config
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(model) = &self.model {
            cfg.gateway.chat_model = model.clone();
            cfg.gateway.feedback_model = model.clone();
        }
        if let Some(model) = &self.feedback_model {
            cfg.gateway.feedback_model = model.clone();
        }
        if let Some(url) = &self.base_url {
            cfg.gateway.base_url = url.clone();
        }
        if let Some(temperature) = self.temperature {
            cfg.gateway.temperature = temperature;
        }
        if let Some(level) = &self.log_level {
            cfg.logging.level = level.clone();
        }
        if self.log_json {
            cfg.logging.json = true;
        }
    }
}

/// Get the path to the history file
fn history_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".convocoach")
        .join("history")
}

pub fn format_personas() -> String {
    let mut out = String::from("Personas:\n");
    for (i, p) in persona::catalog().iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}. {} {} ({}) - {}",
            i + 1,
            p.emoji,
            p.title,
            p.id,
            p.description
        );
    }
    out
}

pub fn format_report(report: &FeedbackReport) -> String {
    let mut out = String::from("=== Feedback ===\n");
    let _ = writeln!(
        out,
        "Clarity:    {:>3.0}/100  {}",
        report.clarity.score, report.clarity.reasoning
    );
    let _ = writeln!(
        out,
        "Confidence: {:>3.0}/100  {}",
        report.confidence.score, report.confidence.reasoning
    );
    if report.filler_words.is_empty() {
        out.push_str("Filler words: No significant filler words detected. Great job!\n");
    } else {
        let _ = writeln!(out, "Filler words: {}", report.filler_words.join(", "));
    }
    out.push_str("Suggestions:\n");
    if report.suggestions.is_empty() {
        out.push_str("  No major corrections found. Your responses were solid!\n");
    } else {
        for (i, s) in report.suggestions.iter().enumerate() {
            let _ = writeln!(out, "  {}. \"{}\"", i + 1, s.original);
            let _ = writeln!(out, "     -> \"{}\"", s.improved);
            let _ = writeln!(out, "     {}", s.explanation);
        }
    }
    let _ = writeln!(out, "Summary: {}", report.overall_summary);
    out
}

/// Resolve a persona to start, only while no session is running
fn choose_persona(phase: Phase, selector: &str) -> Result<&'static Persona, String> {
    if phase != Phase::Idle {
        return Err(format!(
            "A session is already {}. Type /restart to pick another persona.",
            phase
        ));
    }
    persona::find_persona(selector)
        .map_err(|e| format!("{}. Pick a number from the list or /personas.", e))
}

/// Renders session events to stdout
#[derive(Default)]
struct Printer {
    /// A streamed reply is open on the current line
    mid_line: bool,
}

impl Printer {
    fn finish_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }

    fn render(&mut self, event: &SessionEvent, speaker: &str) {
        match event {
            SessionEvent::MessageAppended(m) if m.author == Author::Model => {
                self.finish_line();
                if m.text.is_empty() {
                    print!("{}: ", speaker);
                    self.mid_line = true;
                } else {
                    println!("{}: {}", speaker, m.text);
                }
            }
            SessionEvent::FragmentApplied { fragment, .. } => {
                print!("{}", fragment);
                self.mid_line = true;
            }
            SessionEvent::MessageReplaced { text, .. } => {
                self.finish_line();
                println!("{}: {}", speaker, text);
            }
            SessionEvent::StreamingChanged(false) => self.finish_line(),
            SessionEvent::PhaseChanged(Phase::Analyzing) => {
                self.finish_line();
                println!("Analyzing your conversation...");
            }
            SessionEvent::ReportReady(report) => {
                self.finish_line();
                print!("{}", format_report(report));
                println!("Type /restart to practice again.");
            }
            SessionEvent::Reset => {
                self.finish_line();
                println!("Session reset.");
            }
            _ => {}
        }
        let _ = io::stdout().flush();
    }
}

struct Repl {
    rt: Runtime,
    session: Arc<Session>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    printer: Printer,
}

impl Repl {
    fn speaker(session: &Session) -> &'static str {
        session.persona().map(|p| p.title).unwrap_or("Model")
    }

    /// Run a session operation to completion, rendering its events as they
    /// arrive
    fn drive<F>(&mut self, op: F) -> Result<(), SessionError>
    where
        F: Future<Output = Result<(), SessionError>>,
    {
        let Self {
            rt,
            session,
            events,
            printer,
        } = self;
        rt.block_on(async {
            tokio::pin!(op);
            loop {
                tokio::select! {
                    result = &mut op => {
                        while let Ok(event) = events.try_recv() {
                            printer.render(&event, Self::speaker(session));
                        }
                        return result;
                    }
                    Some(event) = events.recv() => {
                        printer.render(&event, Self::speaker(session));
                    }
                }
            }
        })
    }

    /// Render events produced by synchronous operations
    fn flush_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.printer.render(&event, Self::speaker(&self.session));
        }
    }

    fn start(&mut self, selector: &str) {
        let chosen = match choose_persona(self.session.phase(), selector) {
            Ok(p) => p,
            Err(message) => {
                eprintln!("{}", message);
                return;
            }
        };
        println!("{} {}: {}", chosen.emoji, chosen.title, chosen.description);
        println!("({})", INITIAL_GREETING);

        let session = Arc::clone(&self.session);
        if let Err(e) = self.drive(session.select_persona(chosen.id)) {
            eprintln!("Error: {}", e);
        }
    }

    fn send(&mut self, text: &str) {
        let session = Arc::clone(&self.session);
        if let Err(e) = self.drive(session.user_send(text)) {
            eprintln!("Error: {}", e);
        }
    }

    fn end(&mut self) {
        let session = Arc::clone(&self.session);
        if let Err(e) = self.drive(session.end_session()) {
            eprintln!("Error: {}", e);
        }
    }

    fn print_transcript(&self) {
        let speaker = Self::speaker(&self.session);
        let messages = self.session.messages();
        if messages.is_empty() {
            println!("No messages yet.");
            return;
        }
        for m in messages {
            let who = match m.author {
                Author::User => "You",
                Author::Model => speaker,
            };
            println!("[{}] {}: {}", m.created_at.format("%H:%M:%S"), who, m.text);
        }
    }

    /// Returns true when the REPL should exit
    fn handle_command(&mut self, cmd: &str) -> bool {
        let parts: Vec<&str> = cmd.splitn(2, ' ').collect();
        match parts[0] {
            "/exit" | "/quit" => return true,
            "/help" => {
                println!("Commands:");
                println!("  /personas       - list personas");
                println!("  /persona <n|id> - start a session with a persona");
                println!("  /end            - end the session and get feedback");
                println!("  /restart        - discard this session and pick again");
                println!("  /transcript     - show the conversation so far");
                println!("  /help           - show commands");
                println!("  /exit           - quit");
            }
            "/personas" => print!("{}", format_personas()),
            "/persona" => match parts.get(1) {
                Some(selector) => self.start(selector.trim()),
                None => println!("Usage: /persona <number|id>"),
            },
            "/end" => self.end(),
            "/restart" => {
                self.session.restart();
                self.flush_events();
                print!("{}", format_personas());
            }
            "/transcript" => self.print_transcript(),
            other => println!("Unknown command: {}", other),
        }
        false
    }

    fn handle_line(&mut self, line: &str) {
        match self.session.phase() {
            Phase::Idle => self.start(line),
            Phase::Active => self.send(line),
            Phase::Analyzing => println!("Still analyzing, please wait."),
            Phase::Finished => println!("Session finished. Type /restart to practice again."),
        }
    }
}

fn prompt_for(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle => "persona> ",
        Phase::Active => "you> ",
        Phase::Analyzing | Phase::Finished => "> ",
    }
}

pub fn run_repl(session: Arc<Session>, args: &Args) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_file = history_path();
    let _ = rl.load_history(&history_file);

    let events = session.subscribe();
    let mut repl = Repl {
        rt: Runtime::new()?,
        session,
        events,
        printer: Printer::default(),
    };

    println!("convocoach - type /help for commands, /exit to quit");
    print!("{}", format_personas());
    if let Some(selector) = &args.persona {
        repl.start(selector);
    }

    loop {
        match rl.readline(prompt_for(repl.session.phase())) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if line.starts_with('/') {
                    if repl.handle_command(line) {
                        break;
                    }
                    continue;
                }
                repl.handle_line(line);
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(parent) = history_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = rl.save_history(&history_file);

    Ok(())
}
