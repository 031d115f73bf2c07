use std::fmt::Write as _;
use std::io::{self, Read};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use time::format_description::well_known::Rfc3339;
use time::UtcOffset;

use crate::clock::from_millis;
use crate::lifecycle::{remaining_time_bucket, Lifecycle, LifecycleUnit};
use crate::store::{Note, NotePatch, NoteStore};
use crate::sweeper::{ExpirationSweeper, SweepTrigger};

#[derive(Args, Debug, Clone, Default)]
pub struct LifecycleArgs {
    /// Lifecycle unit: forever, today, hour, day, week, month or year
    #[arg(long)]
    pub lifecycle: Option<LifecycleUnit>,
    /// Count for timed units (e.g. --lifecycle day --value 3)
    #[arg(long, requires = "lifecycle")]
    pub value: Option<u32>,
}

impl LifecycleArgs {
    pub fn to_lifecycle(&self) -> Result<Option<Lifecycle>> {
        let Some(unit) = self.lifecycle else {
            if self.value.is_some() {
                bail!("--value needs a --lifecycle unit");
            }
            return Ok(None);
        };
        let lifecycle = Lifecycle::new(unit, self.value);
        lifecycle
            .validate()
            .with_context(|| format!("invalid {unit} lifecycle"))?;
        Ok(Some(lifecycle))
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct NewArgs {
    /// Note text. If omitted, reads from stdin.
    #[arg()]
    pub text: Option<String>,
    /// Optional title
    #[arg(long)]
    pub title: Option<String>,
    #[command(flatten)]
    pub lifecycle: LifecycleArgs,
    /// Pin the new note
    #[arg(long)]
    pub pin: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Print the notes as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct NoteIdArgs {
    /// Note id or a unique prefix of it
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Note id or a unique prefix of it
    pub id: String,
    #[arg(long)]
    pub text: Option<String>,
    #[arg(long)]
    pub title: Option<String>,
    #[command(flatten)]
    pub lifecycle: LifecycleArgs,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Note id or a unique prefix of it
    pub id: String,
    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SettingsCommand {
    /// Print the stored settings
    Show,
    /// Set the lifecycle given to new notes
    DefaultLifecycle {
        unit: LifecycleUnit,
        value: Option<u32>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub command: SettingsCommand,
}

pub fn new_note(store: &mut NoteStore, args: NewArgs) -> Result<String> {
    let lifecycle = args.lifecycle.to_lifecycle()?;
    let text = match args.text {
        Some(text) => text,
        None => read_stdin()?.unwrap_or_default(),
    };

    let note = store.create(text);
    let mut patch = NotePatch {
        title: args.title,
        lifecycle,
        ..NotePatch::default()
    };
    if args.pin {
        patch.is_pinned = Some(true);
    }
    let note = if patch.is_empty() {
        note
    } else {
        store
            .update(&note.id, patch)
            .context("applying new note options")?
            .unwrap_or(note)
    };
    store.flush()?;
    Ok(format!(
        "Created note {}{}",
        short_id(&note.id),
        if note.is_pinned { " (pinned)" } else { "" }
    ))
}

pub fn list_notes(store: &NoteStore, args: &ListArgs) -> Result<String> {
    let notes = store.list();
    if args.json {
        let mut json = serde_json::to_string_pretty(&notes).context("serialising notes")?;
        json.push('\n');
        return Ok(json);
    }
    Ok(format_listing(&notes, store.now_millis()))
}

pub fn show_note(store: &NoteStore, args: &NoteIdArgs) -> Result<String> {
    let id = resolve_id(store, &args.id)?;
    let note = store
        .find_by_id(&id)
        .with_context(|| format!("note {id} not found"))?;
    Ok(format_note(note, store.now_millis(), store.clock().offset()))
}

pub fn edit_note(store: &mut NoteStore, args: EditArgs) -> Result<String> {
    let id = resolve_id(store, &args.id)?;
    let patch = NotePatch {
        text: args.text,
        title: args.title,
        lifecycle: args.lifecycle.to_lifecycle()?,
        is_pinned: None,
    };
    if patch.is_empty() {
        bail!("nothing to change: pass --text, --title or --lifecycle");
    }
    let note = store
        .update(&id, patch)
        .with_context(|| format!("updating note {}", short_id(&id)))?
        .with_context(|| format!("note {id} not found"))?;
    store.flush()?;
    Ok(format!(
        "Updated note {} ({})",
        short_id(&note.id),
        remaining_time_bucket(note.expires_at, store.now_millis())
    ))
}

pub fn toggle_pin(store: &mut NoteStore, args: &NoteIdArgs) -> Result<String> {
    let id = resolve_id(store, &args.id)?;
    let pinned = store
        .toggle_pin(&id)
        .with_context(|| format!("note {id} not found"))?;
    store.flush()?;
    Ok(format!(
        "{} note {}",
        if pinned { "Pinned" } else { "Unpinned" },
        short_id(&id)
    ))
}

pub fn delete_note(store: &mut NoteStore, args: &DeleteArgs) -> Result<String> {
    let id = resolve_id(store, &args.id)?;
    if store.settings().confirm_before_delete && !args.yes {
        let headline = store
            .find_by_id(&id)
            .map(|note| note.headline().to_string())
            .unwrap_or_default();
        if !confirm(&format!("Delete \"{}\"?", display_headline(&headline)))? {
            return Ok("Cancelled".to_string());
        }
    }
    if !store.delete(&id) {
        bail!("note {id} not found");
    }
    store.flush()?;
    Ok(format!("Deleted note {}", short_id(&id)))
}

pub fn sweep_notes(store: &mut NoteStore, sweeper: &mut ExpirationSweeper) -> Result<String> {
    let now = store.now_millis();
    let report = sweeper.sweep(store, now, SweepTrigger::Manual);
    if let Some(error) = report.error {
        bail!("removed {} expired notes but could not save: {error}", report.removed);
    }
    Ok(match report.removed {
        0 => "No expired notes".to_string(),
        1 => "Removed 1 expired note".to_string(),
        n => format!("Removed {n} expired notes"),
    })
}

pub fn handle_settings(store: &mut NoteStore, args: SettingsArgs) -> Result<String> {
    match args.command {
        SettingsCommand::Show => {
            let mut json =
                serde_json::to_string_pretty(store.settings()).context("serialising settings")?;
            json.push('\n');
            Ok(json)
        }
        SettingsCommand::DefaultLifecycle { unit, value } => {
            let lifecycle = Lifecycle::new(unit, value);
            store.set_default_lifecycle(lifecycle)?;
            Ok(format!("New notes will use: {lifecycle}"))
        }
    }
}

pub fn resolve_id(store: &NoteStore, needle: &str) -> Result<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        bail!("note id cannot be empty");
    }
    if store.find_by_id(needle).is_some() {
        return Ok(needle.to_string());
    }
    let matches: Vec<String> = store
        .list()
        .into_iter()
        .filter(|note| note.id.starts_with(needle))
        .map(|note| note.id)
        .collect();
    match matches.as_slice() {
        [] => bail!("note {needle} not found"),
        [id] => Ok(id.clone()),
        _ => bail!("note id {needle} is ambiguous ({} matches)", matches.len()),
    }
}

pub fn format_listing(notes: &[Note], now: i64) -> String {
    if notes.is_empty() {
        return "No notes.\n".to_string();
    }
    let mut out = String::new();
    for note in notes {
        let mut headline = format!("{}  {}", short_id(&note.id), display_headline(note.headline()));
        if note.is_pinned {
            headline.push_str("  [PINNED]");
        }
        let _ = writeln!(&mut out, "{headline}");
        let _ = writeln!(
            &mut out,
            "    {}  ({})",
            note.lifecycle,
            remaining_time_bucket(note.expires_at, now)
        );
    }
    out
}

fn format_note(note: &Note, now: i64, offset: UtcOffset) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "id        {}", note.id);
    if !note.title.is_empty() {
        let _ = writeln!(&mut out, "title     {}", note.title);
    }
    let _ = writeln!(&mut out, "created   {}", format_timestamp(note.created_at, offset));
    let _ = writeln!(&mut out, "updated   {}", format_timestamp(note.updated_at, offset));
    let _ = writeln!(&mut out, "lifecycle {}", note.lifecycle);
    match note.expires_at {
        Some(expires_at) => {
            let _ = writeln!(
                &mut out,
                "expires   {} ({})",
                format_timestamp(expires_at, offset),
                remaining_time_bucket(Some(expires_at), now)
            );
        }
        None => {
            let _ = writeln!(&mut out, "expires   never");
        }
    }
    if note.is_pinned {
        let _ = writeln!(&mut out, "pinned    yes");
    }
    out.push('\n');
    out.push_str(&note.text);
    if !note.text.ends_with('\n') {
        out.push('\n');
    }
    out
}

pub(crate) fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

fn display_headline(headline: &str) -> String {
    if headline.is_empty() {
        return "<empty>".to_string();
    }
    let mut truncated: String = headline.chars().take(60).collect();
    if truncated.len() < headline.len() {
        truncated.push('…');
    }
    truncated
}

fn format_timestamp(millis: i64, offset: UtcOffset) -> String {
    from_millis(millis, offset)
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}

fn confirm(question: &str) -> Result<bool> {
    use std::io::Write;
    if !atty::is(atty::Stream::Stdin) {
        bail!("refusing to delete without confirmation; pass --yes");
    }
    let mut stdout = io::stdout();
    write!(stdout, "{question} [y/N]: ")?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim(), "y" | "Y" | "yes"))
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading note text from stdin")?;
    Ok(Some(buf))
}
