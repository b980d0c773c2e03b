//! A terminal chat client built on `chatwire`.

#[macro_use]
extern crate tracing;

mod command;

use std::env;
use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use chatwire::core::transcript::{LogicalMessage, MessageId, Role};
use chatwire::core::{Notice, Phase, SendOutcome, TranscriptEvent};
use chatwire::{ConvType, Identity, ModelId, SessionBuilder};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};

use command::Command;

enum SessionEvent {
    Transcript(TranscriptEvent),
    Notice(Notice),
    Phase(Phase),
}

const BAR_CHAR: &str = "▎";

/// Replies have no end marker; a reply quiet for this long gets the prompt
/// back.
const REPLY_IDLE: Duration = Duration::from_millis(1500);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let identity = env::var("CHATWIRE_USER_ID")
        .ok()
        .zip(env::var("CHATWIRE_ACCESS_TOKEN").ok())
        .and_then(|(user_id, token)| Identity::new(user_id, token));
    let Some(identity) = identity else {
        eprintln!(
            "{}",
            "You are not signed in: set CHATWIRE_USER_ID and \
             CHATWIRE_ACCESS_TOKEN."
                .bright_red()
        );
        return ExitCode::FAILURE;
    };
    let Ok(endpoint) = env::var("CHATWIRE_ENDPOINT") else {
        eprintln!("CHATWIRE_ENDPOINT environment variable is not set");
        return ExitCode::FAILURE;
    };

    let mut conv_type = match env::var("CHATWIRE_CONV_TYPE") {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("unknown conversation mode {value:?}, using normal");
            ConvType::Normal
        }),
        Err(_) => ConvType::Normal,
    };
    let mut model = env::var("CHATWIRE_MODEL")
        .map(|alias| ModelId::from_alias(&alias))
        .unwrap_or_default();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();

    let mut builder = SessionBuilder::new(endpoint, identity)
        .with_conv_type(conv_type)
        .with_model(model.clone())
        .on_transcript({
            let event_tx = event_tx.clone();
            move |event| {
                event_tx.send(SessionEvent::Transcript(event)).ok();
            }
        })
        .on_notice({
            let event_tx = event_tx.clone();
            move |notice| {
                event_tx.send(SessionEvent::Notice(notice)).ok();
            }
        })
        .on_phase({
            let event_tx = event_tx.clone();
            move |phase| {
                event_tx.send(SessionEvent::Phase(phase)).ok();
            }
        });
    match env::var("CHATWIRE_HISTORY_URL") {
        Ok(url) => builder = builder.with_history_url(url),
        Err(_) => warn!("CHATWIRE_HISTORY_URL is not set, skipping history"),
    }
    let session = builder.build();
    drop(event_tx);

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    let mut progress_bar: Option<ProgressBar> = None;
    let mut printer = StreamPrinter::default();
    let mut last_event = Instant::now();
    let mut lines = io::BufReader::new(io::stdin()).lines();

    println!(
        "{}",
        format!(
            "mode: {conv_type}, model: {model} \
             (/qa, /normal, /model <claude|titan|id>, /quit)"
        )
        .dimmed()
    );
    prompt();

    loop {
        let tick = sleep(Duration::from_millis(100));
        select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(err) => {
                        error!("error reading input: {err}");
                        break;
                    }
                };

                let mut show_prompt = true;
                match Command::parse(&line) {
                    Command::Empty => {}
                    Command::Quit => break,
                    Command::Mode(mode) => {
                        conv_type = mode;
                        println!("{}", format!("mode: {conv_type}").dimmed());
                    }
                    Command::Model(id) => {
                        model = id;
                        println!("{}", format!("model: {model}").dimmed());
                    }
                    Command::Invalid(line) => {
                        println!(
                            "{}",
                            format!("unknown command {line:?}").bright_red()
                        );
                    }
                    Command::Say(text) => {
                        let message = session
                            .compose(text)
                            .with_conv_type(conv_type)
                            .with_model(model.clone());
                        match session.send(message).await {
                            Ok(SendOutcome::Sent(_)) => {
                                let bar = ProgressBar::new_spinner();
                                bar.set_style(progress_style.clone());
                                bar.set_message("🤔 Thinking...");
                                progress_bar = Some(bar);
                            }
                            // The notice prompts again.
                            Ok(SendOutcome::Deferred) => {}
                            Err(err) => {
                                error!("{err}");
                                break;
                            }
                        }
                        show_prompt = false;
                    }
                }
                if show_prompt {
                    prompt();
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else {
                    break;
                };
                last_event = Instant::now();
                match event {
                    SessionEvent::Transcript(event) => {
                        if let TranscriptEvent::Appended(msg)
                        | TranscriptEvent::Updated(msg) = &event
                        {
                            if msg.is_typing() {
                                if let Some(bar) = &progress_bar {
                                    bar.set_message("✍️  Typing...");
                                }
                            }
                        }
                        // Finish the progress bar before printing anything
                        // else.
                        if printer.is_visible(&event) {
                            if let Some(bar) = progress_bar.take() {
                                bar.finish_and_clear();
                            }
                        }
                        let was_printing = printer.is_printing();
                        printer.print(event);
                        if was_printing && !printer.is_printing() {
                            prompt();
                        }
                    }
                    SessionEvent::Notice(notice) => {
                        if let Some(bar) = progress_bar.take() {
                            bar.finish_and_clear();
                        }
                        printer.pause();
                        print_notice(&notice);
                        prompt();
                    }
                    SessionEvent::Phase(phase) => {
                        debug!("phase: {phase:?}");
                        if phase == Phase::Disconnected {
                            if let Some(bar) = progress_bar.take() {
                                bar.finish_and_clear();
                            }
                            printer.pause();
                            println!("{}", "disconnected".dimmed());
                            prompt();
                        }
                    }
                }
            }
            _ = tick, if progress_bar.is_some() || printer.is_printing() => {
                if let Some(bar) = &progress_bar {
                    bar.inc(1);
                }
                if printer.is_printing() && last_event.elapsed() > REPLY_IDLE {
                    printer.pause();
                    prompt();
                }
            }
        }
    }

    session.close();
    ExitCode::SUCCESS
}

struct Stream {
    id: MessageId,
    shown: usize,
    line_open: bool,
}

/// Prints assistant replies as they stream in.
///
/// Only the newest reply is followed; each update prints the part of its
/// body not shown yet.
#[derive(Default)]
struct StreamPrinter {
    stream: Option<Stream>,
}

impl StreamPrinter {
    /// Returns whether a reply line is open on screen.
    fn is_printing(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.line_open)
    }

    /// Returns whether `event` would print anything.
    fn is_visible(&self, event: &TranscriptEvent) -> bool {
        match event {
            TranscriptEvent::HistoryLoaded(history) => !history.is_empty(),
            TranscriptEvent::Appended(msg) => {
                msg.role() == Role::Assistant && !msg.body().is_empty()
            }
            TranscriptEvent::Updated(msg) => {
                self.stream.as_ref().is_some_and(|s| {
                    s.id == msg.id() && msg.body().len() > s.shown
                })
            }
        }
    }

    fn print(&mut self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::HistoryLoaded(history) => {
                if history.is_empty() {
                    return;
                }
                self.pause();
                println!("{}", "── earlier ──".dimmed());
                for msg in &history {
                    print_settled(msg);
                }
                println!("{}", "─────────────".dimmed());
            }
            TranscriptEvent::Appended(msg) => {
                // The user's own turns are already on screen.
                if msg.role() != Role::Assistant {
                    return;
                }
                self.pause();
                self.stream = Some(Stream {
                    id: msg.id(),
                    shown: 0,
                    line_open: false,
                });
                self.update(&msg);
            }
            TranscriptEvent::Updated(msg) => {
                if self.stream.as_ref().is_some_and(|s| s.id == msg.id()) {
                    self.update(&msg);
                }
            }
        }
    }

    fn update(&mut self, msg: &LogicalMessage) {
        let Some(stream) = &mut self.stream else {
            return;
        };
        let delta = msg.body().get(stream.shown..).unwrap_or_default();
        if !delta.is_empty() {
            if !stream.line_open {
                print!("{}🤖 ", BAR_CHAR.bright_cyan());
                stream.line_open = true;
            }
            print!("{}", delta.bright_white());
            stream.shown = msg.body().len();
            flush();
        }

        if msg.is_failed() {
            println!(" {}", "(failed)".bright_red());
            self.stream = None;
        } else if msg.is_settled() {
            if stream.line_open {
                println!();
            }
            self.stream = None;
        }
    }

    /// Ends the reply line on screen, if any. Later fragments of the same
    /// reply start a new line.
    fn pause(&mut self) {
        if let Some(stream) = &mut self.stream {
            if stream.line_open {
                println!();
                stream.line_open = false;
            }
        }
    }
}

fn print_settled(msg: &LogicalMessage) {
    match msg.role() {
        Role::User => {
            let when = msg
                .timestamp()
                .map(|t| t.format("%Y-%m-%d %H:%M ").to_string())
                .unwrap_or_default();
            println!("{}{}{}", BAR_CHAR.dimmed(), when.dimmed(), msg.body());
        }
        Role::Assistant => {
            for line in msg.lines() {
                println!(
                    "{}🤖 {}",
                    BAR_CHAR.bright_cyan(),
                    line.bright_white()
                );
            }
        }
    }
}

fn print_notice(notice: &Notice) {
    let bar = BAR_CHAR.bright_yellow();
    match notice {
        Notice::Reconnecting => println!(
            "{bar}⚠️  Connection lost. Reconnecting, please send your \
             message again."
        ),
        Notice::HistoryUnavailable(reason) => {
            println!("{bar}⚠️  History is unavailable: {}", reason.dimmed())
        }
    }
}

fn prompt() {
    print!("> ");
    flush();
}

#[inline]
fn flush() {
    std::io::stdout().flush().ok();
}
