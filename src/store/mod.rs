use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::{to_millis, Clock};
use crate::lifecycle::{compute_expires_at, Lifecycle, LifecycleError};
use crate::settings::AppSettings;
use crate::storage::NoteRepository;

mod note;
mod observer;

pub use note::{canonical_order, Note, NotePatch};
pub use observer::{Listener, Subscription};

use observer::Listeners;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid lifecycle: {0}")]
    InvalidLifecycle(#[from] LifecycleError),
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub write_settle: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            write_settle: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistEvent {
    Saved { count: usize },
    Failed { message: String },
}

#[derive(Debug, Default)]
struct PendingWrite {
    dirty_since: Option<Instant>,
    last_error: Option<String>,
}

type NoteMap = IndexMap<String, Note>;

pub struct NoteStore {
    // Newest first; `list` sorts stably so ties keep this order.
    notes: NoteMap,
    repository: NoteRepository,
    clock: Arc<dyn Clock>,
    settings: AppSettings,
    options: StoreOptions,
    pending: PendingWrite,
    listeners: Rc<RefCell<Listeners>>,
    loaded: bool,
}

impl NoteStore {
    pub fn new(repository: NoteRepository, clock: Arc<dyn Clock>, options: StoreOptions) -> Self {
        Self {
            notes: NoteMap::new(),
            repository,
            clock,
            settings: AppSettings::default(),
            options,
            pending: PendingWrite::default(),
            listeners: Rc::new(RefCell::new(Listeners::default())),
            loaded: false,
        }
    }

    pub fn load(&mut self) {
        let notes = self.repository.load();
        self.settings = self.repository.load_settings();
        self.notes = notes
            .into_iter()
            .map(|note| (note.id.clone(), note))
            .collect();
        self.loaded = true;
        self.pending = PendingWrite::default();
        tracing::info!(count = self.notes.len(), "note store loaded");
        self.notify();
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn repository(&self) -> &NoteRepository {
        &self.repository
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&[Note]) + 'static,
    {
        Listeners::register(&self.listeners, Box::new(listener))
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn create(&mut self, text: impl Into<String>) -> Note {
        let now = self.clock.now();
        let created_at = to_millis(now);
        let mut lifecycle = self.settings.effective_default_lifecycle();
        let expires_at = match compute_expires_at(&lifecycle, created_at, now.offset()) {
            Ok(expires_at) => expires_at,
            Err(err) => {
                tracing::warn!(%err, "default lifecycle unusable for new note, using forever");
                lifecycle = Lifecycle::forever();
                None
            }
        };
        let note = Note {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            title: String::new(),
            created_at,
            updated_at: created_at,
            is_pinned: false,
            lifecycle,
            expires_at,
        };
        let inserted = note.clone();
        self.commit(|notes| {
            notes.shift_insert(0, inserted.id.clone(), inserted);
            Ok(true)
        })
        .unwrap_or_default();
        tracing::debug!(id = %note.id, lifecycle = %note.lifecycle, "note created");
        note
    }

    /// Merges `patch` into the note. Returns `Ok(None)` when the note does
    /// not exist. A lifecycle in the patch is validated before anything is
    /// touched and `expires_at` is recomputed from the note's `created_at`.
    pub fn update(&mut self, id: &str, patch: NotePatch) -> Result<Option<Note>, StoreError> {
        if let Some(lifecycle) = &patch.lifecycle {
            lifecycle.validate()?;
        }
        let now = self.clock.now_millis();
        let offset = self.clock.offset();
        let mut updated = None;
        self.commit(|notes| {
            let Some(note) = notes.get_mut(id) else {
                return Ok(false);
            };
            if let Some(lifecycle) = patch.lifecycle {
                note.expires_at = compute_expires_at(&lifecycle, note.created_at, offset)?;
                note.lifecycle = lifecycle;
            }
            if let Some(text) = patch.text {
                note.text = text;
            }
            if let Some(title) = patch.title {
                note.title = title;
            }
            if let Some(is_pinned) = patch.is_pinned {
                note.is_pinned = is_pinned;
            }
            note.updated_at = note.updated_at.max(now);
            updated = Some(note.clone());
            Ok(true)
        })?;
        Ok(updated)
    }

    pub fn delete(&mut self, id: &str) -> bool {
        self.commit(|notes| Ok(notes.shift_remove(id).is_some()))
            .unwrap_or_default()
    }

    pub fn toggle_pin(&mut self, id: &str) -> Option<bool> {
        let now = self.clock.now_millis();
        let mut pinned = None;
        self.commit(|notes| {
            let Some(note) = notes.get_mut(id) else {
                return Ok(false);
            };
            note.is_pinned = !note.is_pinned;
            note.updated_at = note.updated_at.max(now);
            pinned = Some(note.is_pinned);
            Ok(true)
        })
        .unwrap_or_default();
        pinned
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Note> {
        self.notes.get(id)
    }

    pub fn list(&self) -> Vec<Note> {
        let mut notes: Vec<Note> = self.notes.values().cloned().collect();
        notes.sort_by(canonical_order);
        notes
    }

    pub fn top_note_id(&self) -> Option<String> {
        self.notes
            .values()
            .min_by(|a, b| canonical_order(a, b))
            .map(|note| note.id.clone())
    }

    /// Drops every note whose expiry is strictly before `now`. Returns how
    /// many notes were removed.
    pub fn sweep(&mut self, now: i64) -> usize {
        let mut removed = 0;
        self.commit(|notes| {
            let before = notes.len();
            notes.retain(|_, note| !note.is_expired_at(now));
            removed = before - notes.len();
            Ok(removed > 0)
        })
        .unwrap_or_default();
        removed
    }

    /// Validates and stores a new default lifecycle for notes created later.
    /// Existing notes are untouched.
    pub fn set_default_lifecycle(&mut self, lifecycle: Lifecycle) -> Result<()> {
        lifecycle.validate().map_err(StoreError::from)?;
        let mut settings = self.settings.clone();
        settings.default_lifecycle = lifecycle;
        self.repository.save_settings(&settings)?;
        self.settings = settings;
        tracing::info!(%lifecycle, "default lifecycle updated");
        Ok(())
    }

    pub(crate) fn insert(&mut self, note: Note) -> bool {
        self.commit(|notes| {
            if notes.contains_key(&note.id) {
                return Ok(false);
            }
            notes.shift_insert(0, note.id.clone(), note);
            Ok(true)
        })
        .unwrap_or_default()
    }

    pub fn has_pending_writes(&self) -> bool {
        self.pending.dirty_since.is_some()
    }

    pub fn last_write_error(&self) -> Option<&str> {
        self.pending.last_error.as_deref()
    }

    /// Writes the snapshot once the settle window since the last mutation has
    /// passed. The snapshot is taken at write time, not when it was scheduled.
    pub fn poll_persistence(&mut self, now: Instant) -> Option<PersistEvent> {
        let since = self.pending.dirty_since?;
        if now.saturating_duration_since(since) < self.options.write_settle {
            return None;
        }
        Some(match self.write_snapshot() {
            Ok(count) => PersistEvent::Saved { count },
            Err(err) => {
                // Retry after another settle window.
                self.pending.dirty_since = Some(now);
                PersistEvent::Failed {
                    message: format!("{err:#}"),
                }
            }
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.pending.dirty_since.is_none() {
            return Ok(());
        }
        self.write_snapshot().map(|_| ())
    }

    fn write_snapshot(&mut self) -> Result<usize> {
        let snapshot = self.list();
        match self.repository.save(&snapshot) {
            Ok(()) => {
                self.pending = PendingWrite::default();
                tracing::debug!(count = snapshot.len(), "notes persisted");
                Ok(snapshot.len())
            }
            Err(err) => {
                tracing::error!(?err, "failed to persist notes");
                self.pending.last_error = Some(format!("{err:#}"));
                Err(err)
            }
        }
    }

    fn commit<F>(&mut self, transform: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut NoteMap) -> Result<bool, LifecycleError>,
    {
        let mut next = self.notes.clone();
        if !transform(&mut next)? {
            return Ok(false);
        }
        self.notes = next;
        // Each mutation restarts the settle window.
        self.pending.dirty_since = Some(Instant::now());
        self.notify();
        Ok(true)
    }

    fn notify(&self) {
        if self.listeners.borrow().len() == 0 {
            return;
        }
        let snapshot = self.list();
        self.listeners.borrow_mut().notify(&snapshot);
    }
}
