use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{tick, unbounded, Receiver};

use super::commands::{format_listing, resolve_id, short_id};
use crate::config::AppConfig;
use crate::journaling::{EditEvent, EditSession};
use crate::lifecycle::{Lifecycle, LifecycleUnit};
use crate::store::{NoteStore, PersistEvent};
use crate::sweeper::ExpirationSweeper;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCommand {
    Open(String),
    Text(String),
    Title(String),
    Lifecycle(Lifecycle),
    Close,
    Background,
    Foreground,
    New(String),
    List,
    Pin(String),
    Delete(String),
    Quit,
}

impl FromStr for RuntimeCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim_start();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim_start()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "open" => RuntimeCommand::Open(required(rest, "open <id>")?),
            "text" => RuntimeCommand::Text(unescape(rest)),
            "title" => RuntimeCommand::Title(rest.trim_end().to_string()),
            "lifecycle" => RuntimeCommand::Lifecycle(parse_lifecycle(rest)?),
            "close" => RuntimeCommand::Close,
            "background" | "bg" => RuntimeCommand::Background,
            "foreground" | "fg" => RuntimeCommand::Foreground,
            "new" => RuntimeCommand::New(unescape(rest)),
            "list" | "ls" => RuntimeCommand::List,
            "pin" => RuntimeCommand::Pin(required(rest, "pin <id>")?),
            "delete" | "rm" => RuntimeCommand::Delete(required(rest, "delete <id>")?),
            "quit" | "exit" => RuntimeCommand::Quit,
            "" => bail!("empty command"),
            other => bail!("unknown command `{other}`"),
        };
        Ok(command)
    }
}

fn required(rest: &str, usage: &str) -> Result<String> {
    let value = rest.trim();
    if value.is_empty() {
        bail!("usage: {usage}");
    }
    Ok(value.to_string())
}

/// Lines carry one record each, so `\n` in text stands for a newline.
fn unescape(raw: &str) -> String {
    raw.replace("\\n", "\n")
}

fn parse_lifecycle(rest: &str) -> Result<Lifecycle> {
    let mut parts = rest.split_whitespace();
    let unit_raw = parts.next().context("usage: lifecycle <unit> [value]")?;
    let unit = LifecycleUnit::from_str(unit_raw)
        .with_context(|| format!("unknown lifecycle unit `{unit_raw}`"))?;
    let value = parts
        .next()
        .map(|raw| {
            raw.parse::<u32>()
                .with_context(|| format!("`{raw}` is not a whole number"))
        })
        .transpose()?;
    if parts.next().is_some() {
        bail!("usage: lifecycle <unit> [value]");
    }
    Ok(Lifecycle::new(unit, value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct WatchRuntime {
    session: EditSession,
    sweeper: ExpirationSweeper,
}

impl WatchRuntime {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            session: EditSession::new(&config.auto_save),
            sweeper: ExpirationSweeper::new(&config.sweep),
        }
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn handle<W: Write>(
        &mut self,
        store: &mut NoteStore,
        command: RuntimeCommand,
        out: &mut W,
    ) -> Result<Flow> {
        match command {
            RuntimeCommand::Open(needle) => {
                let id = resolve_id(store, &needle)?;
                let event = self.session_open(store, &id);
                self.report_edit(event, out)?;
                writeln!(out, "editing {}", short_id(&id))?;
            }
            RuntimeCommand::Text(text) => {
                if !self.session.set_text(&text) {
                    bail!("no note open");
                }
            }
            RuntimeCommand::Title(title) => {
                if !self.session.set_title(&title) {
                    bail!("no note open");
                }
            }
            RuntimeCommand::Lifecycle(lifecycle) => {
                if !self.session.has_active_session() {
                    bail!("no note open");
                }
                if let Err(err) = self.session.set_lifecycle(lifecycle) {
                    writeln!(out, "invalid lifecycle: {err}")?;
                }
            }
            RuntimeCommand::Close => {
                let event = self.session.close(store);
                self.report_edit(event, out)?;
            }
            RuntimeCommand::Background => {
                let event = self.session.flush(store);
                self.report_edit(event, out)?;
                self.sweeper.on_background();
                store.flush().context("saving notes on background")?;
            }
            RuntimeCommand::Foreground => {
                let now = store.now_millis();
                let report = self.sweeper.on_foreground(store, now);
                if report.removed > 0 {
                    writeln!(out, "removed {} expired notes", report.removed)?;
                }
            }
            RuntimeCommand::New(text) => {
                let note = store.create(text);
                let event = self.session_open(store, &note.id);
                self.report_edit(event, out)?;
                writeln!(out, "created {}", short_id(&note.id))?;
            }
            RuntimeCommand::List => {
                write!(out, "{}", format_listing(&store.list(), store.now_millis()))?;
            }
            RuntimeCommand::Pin(needle) => {
                let id = resolve_id(store, &needle)?;
                if let Some(pinned) = store.toggle_pin(&id) {
                    writeln!(
                        out,
                        "{} {}",
                        if pinned { "pinned" } else { "unpinned" },
                        short_id(&id)
                    )?;
                }
            }
            RuntimeCommand::Delete(needle) => {
                let id = resolve_id(store, &needle)?;
                if store.delete(&id) {
                    writeln!(out, "deleted {}", short_id(&id))?;
                }
                if self.session.note_id() == Some(id.as_str()) {
                    self.session.close(store);
                }
            }
            RuntimeCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Fires whatever deadlines have passed at `at`.
    pub fn tick<W: Write>(
        &mut self,
        store: &mut NoteStore,
        at: Instant,
        out: &mut W,
    ) -> Result<()> {
        let event = self.session.poll_at(store, at);
        self.report_edit(event, out)?;
        if let Some(PersistEvent::Failed { message }) = store.poll_persistence(at) {
            writeln!(out, "save failed: {message}")?;
        }
        Ok(())
    }

    pub fn sweep_tick<W: Write>(
        &mut self,
        store: &mut NoteStore,
        at: Instant,
        out: &mut W,
    ) -> Result<()> {
        let now = store.now_millis();
        if let Some(report) = self.sweeper.poll(store, at, now) {
            if report.removed > 0 {
                writeln!(out, "removed {} expired notes", report.removed)?;
            }
        }
        Ok(())
    }

    pub fn shutdown<W: Write>(&mut self, store: &mut NoteStore, out: &mut W) -> Result<()> {
        let event = self.session.close(store);
        let saved = store.flush().context("saving notes on exit");
        self.report_edit(event, out)?;
        saved
    }

    fn session_open(&mut self, store: &mut NoteStore, id: &str) -> Option<EditEvent> {
        let event = self.session.flush(store);
        self.session.open(store, id);
        event
    }

    fn report_edit<W: Write>(&self, event: Option<EditEvent>, out: &mut W) -> Result<()> {
        match event {
            Some(EditEvent::Saved { note_id, .. }) => {
                tracing::debug!(%note_id, "edit applied");
            }
            Some(EditEvent::Error { note_id, message }) => {
                writeln!(out, "could not save {}: {message}", short_id(&note_id))?;
            }
            Some(EditEvent::Ended { note_id }) => {
                writeln!(out, "note {} is gone", short_id(&note_id))?;
            }
            None => {}
        }
        Ok(())
    }
}

pub fn run_watch(store: &mut NoteStore, config: &AppConfig) -> Result<()> {
    let lines = spawn_stdin_reader()?;
    let poll = tick(POLL_INTERVAL);
    let sweep = tick(Duration::from_secs(config.sweep.interval_secs));
    let mut runtime = WatchRuntime::new(config);
    let subscription = store.subscribe(|notes| {
        tracing::trace!(count = notes.len(), "notes changed");
    });
    let stdout = io::stdout();
    let mut out = stdout.lock();
    tracing::info!("watching; type `quit` to exit");

    let result = drive(&mut runtime, store, &lines, &poll, &sweep, &mut out);
    subscription.unsubscribe();
    result
}

/// Runs the loop until stdin closes, `quit` or an output error, then always
/// shuts the runtime down. The loop's error wins over a shutdown error.
fn drive<W: Write>(
    runtime: &mut WatchRuntime,
    store: &mut NoteStore,
    lines: &Receiver<String>,
    poll: &Receiver<Instant>,
    sweep: &Receiver<Instant>,
    out: &mut W,
) -> Result<()> {
    let result = watch_loop(runtime, store, lines, poll, sweep, out);
    let shutdown = runtime.shutdown(store, out);
    if let (Err(_), Err(err)) = (&result, &shutdown) {
        tracing::error!(?err, "shutdown after watch error failed");
    }
    result.and(shutdown)
}

fn watch_loop<W: Write>(
    runtime: &mut WatchRuntime,
    store: &mut NoteStore,
    lines: &Receiver<String>,
    poll: &Receiver<Instant>,
    sweep: &Receiver<Instant>,
    out: &mut W,
) -> Result<()> {
    loop {
        crossbeam_channel::select! {
            recv(lines) -> msg => {
                let Ok(line) = msg else {
                    // stdin closed
                    return Ok(());
                };
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = line
                    .parse::<RuntimeCommand>()
                    .and_then(|command| runtime.handle(store, command, &mut *out));
                match outcome {
                    Ok(Flow::Quit) => return Ok(()),
                    Ok(Flow::Continue) => {}
                    Err(err) => writeln!(out, "error: {err:#}")?,
                }
            }
            recv(poll) -> msg => {
                if let Ok(at) = msg {
                    runtime.tick(store, at, out)?;
                }
            }
            recv(sweep) -> msg => {
                if let Ok(at) = msg {
                    runtime.sweep_tick(store, at, out)?;
                }
            }
        }
        out.flush()?;
    }
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawning stdin reader")?;
    Ok(rx)
}
