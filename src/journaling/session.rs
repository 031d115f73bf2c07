use std::time::{Duration, Instant};

use crate::config::AutoSaveConfig;
use crate::lifecycle::{Lifecycle, LifecycleError};
use crate::store::{Note, NotePatch, NoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditStatus {
    Inactive,
    Idle {
        note_id: String,
        last_saved_at: Option<i64>,
    },
    Pending {
        note_id: String,
        since: Instant,
    },
    /// The lifecycle draft failed validation and will not be applied.
    Invalid {
        note_id: String,
        message: String,
    },
    Error {
        note_id: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditEvent {
    Saved { note_id: String, updated_at: i64 },
    Error { note_id: String, message: String },
    /// The note vanished (deleted or swept) and the session ended.
    Ended { note_id: String },
}

/// Buffers edits to one note and applies them to the [`NoteStore`] after an
/// idle window. Text and title share one window, the lifecycle has its own.
#[derive(Debug)]
pub struct EditSession {
    text_debounce: Duration,
    lifecycle_debounce: Duration,
    session: Option<Session>,
}

#[derive(Debug)]
struct Session {
    note_id: String,
    text: Draft<String>,
    title: Draft<String>,
    lifecycle: Draft<Lifecycle>,
    invalid_lifecycle: Option<String>,
    last_saved_at: Option<i64>,
    last_error: Option<String>,
}

#[derive(Debug)]
struct Draft<T> {
    value: T,
    dirty_since: Option<Instant>,
}

impl EditSession {
    pub fn new(config: &AutoSaveConfig) -> Self {
        Self::with_debounce(config.text_debounce(), config.lifecycle_debounce())
    }

    pub fn with_debounce(text_debounce: Duration, lifecycle_debounce: Duration) -> Self {
        Self {
            text_debounce,
            lifecycle_debounce,
            session: None,
        }
    }

    pub fn note_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.note_id.as_str())
    }

    pub fn has_active_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn has_dirty_changes(&self) -> bool {
        self.session.as_ref().map(Session::is_dirty).unwrap_or(false)
    }

    pub fn status(&self) -> EditStatus {
        let Some(session) = &self.session else {
            return EditStatus::Inactive;
        };
        let note_id = session.note_id.clone();
        if let Some(message) = &session.invalid_lifecycle {
            return EditStatus::Invalid {
                note_id,
                message: message.clone(),
            };
        }
        if let Some(message) = &session.last_error {
            return EditStatus::Error {
                note_id,
                message: message.clone(),
            };
        }
        if let Some(since) = session.oldest_dirty() {
            return EditStatus::Pending { note_id, since };
        }
        EditStatus::Idle {
            note_id,
            last_saved_at: session.last_saved_at,
        }
    }

    /// Starts editing `id`, seeded from the stored note. A session on another
    /// note is flushed and closed first. Returns false when the note does not
    /// exist.
    pub fn open(&mut self, store: &mut NoteStore, id: &str) -> bool {
        if self.note_id() == Some(id) {
            return true;
        }
        self.close(store);
        let Some(note) = store.find_by_id(id) else {
            return false;
        };
        tracing::debug!(note_id = id, "edit session opened");
        self.session = Some(Session::new(note));
        true
    }

    pub fn set_text(&mut self, text: &str) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.text.value != text {
            session.text.value = text.to_string();
            session.text.mark_dirty_now();
            session.last_error = None;
        }
        true
    }

    pub fn set_title(&mut self, title: &str) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.title.value != title {
            session.title.value = title.to_string();
            session.title.mark_dirty_now();
            session.last_error = None;
        }
        true
    }

    /// Replaces the lifecycle draft. Invalid drafts are kept for display but
    /// never applied. Forever and Today skip the idle window and go out on
    /// the next poll.
    pub fn set_lifecycle(&mut self, lifecycle: Lifecycle) -> Result<(), LifecycleError> {
        let debounce = self.lifecycle_debounce;
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.lifecycle.value = lifecycle;
        if let Err(err) = lifecycle.validate() {
            session.lifecycle.dirty_since = None;
            session.invalid_lifecycle = Some(err.to_string());
            return Err(err);
        }
        session.invalid_lifecycle = None;
        session.last_error = None;
        if lifecycle.unit.is_special() {
            session.lifecycle.mark_dirty_immediate(debounce);
        } else {
            session.lifecycle.mark_dirty_now();
        }
        Ok(())
    }

    pub fn poll(&mut self, store: &mut NoteStore) -> Option<EditEvent> {
        self.poll_at(store, Instant::now())
    }

    pub fn poll_at(&mut self, store: &mut NoteStore, at: Instant) -> Option<EditEvent> {
        self.apply(store, FlushKind::Debounced(at))
    }

    pub fn flush(&mut self, store: &mut NoteStore) -> Option<EditEvent> {
        self.apply(store, FlushKind::Immediate)
    }

    pub fn close(&mut self, store: &mut NoteStore) -> Option<EditEvent> {
        let event = self.flush(store);
        if let Some(session) = self.session.take() {
            tracing::debug!(note_id = %session.note_id, "edit session closed");
        }
        event
    }

    fn apply(&mut self, store: &mut NoteStore, mode: FlushKind) -> Option<EditEvent> {
        let text_debounce = self.text_debounce;
        let lifecycle_debounce = self.lifecycle_debounce;
        let session = self.session.as_mut()?;
        if !session.is_dirty() {
            return None;
        }
        let Some(stored) = store.find_by_id(&session.note_id) else {
            let note_id = session.note_id.clone();
            tracing::debug!(%note_id, "note gone, ending edit session");
            self.session = None;
            return Some(EditEvent::Ended { note_id });
        };

        // Drafts are read at fire time and skipped when they match the note.
        let mut patch = NotePatch::default();
        if session.text.is_ready(mode, text_debounce) {
            session.text.dirty_since = None;
            if session.text.value != stored.text {
                patch.text = Some(session.text.value.clone());
            }
        }
        if session.title.is_ready(mode, text_debounce) {
            session.title.dirty_since = None;
            if session.title.value != stored.title {
                patch.title = Some(session.title.value.clone());
            }
        }
        if session.lifecycle.is_ready(mode, lifecycle_debounce) {
            session.lifecycle.dirty_since = None;
            if session.lifecycle.value != stored.lifecycle {
                patch.lifecycle = Some(session.lifecycle.value);
            }
        }
        if patch.is_empty() {
            return None;
        }

        match store.update(&session.note_id, patch) {
            Ok(Some(note)) => {
                session.last_saved_at = Some(note.updated_at);
                session.last_error = None;
                Some(EditEvent::Saved {
                    note_id: note.id,
                    updated_at: note.updated_at,
                })
            }
            Ok(None) => {
                let note_id = session.note_id.clone();
                self.session = None;
                Some(EditEvent::Ended { note_id })
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!(note_id = %session.note_id, %message, "edit rejected");
                session.last_error = Some(message.clone());
                Some(EditEvent::Error {
                    note_id: session.note_id.clone(),
                    message,
                })
            }
        }
    }
}

impl Session {
    fn new(note: &Note) -> Self {
        Self {
            note_id: note.id.clone(),
            text: Draft::new(note.text.clone()),
            title: Draft::new(note.title.clone()),
            lifecycle: Draft::new(note.lifecycle),
            invalid_lifecycle: None,
            last_saved_at: None,
            last_error: None,
        }
    }

    fn is_dirty(&self) -> bool {
        self.oldest_dirty().is_some()
    }

    fn oldest_dirty(&self) -> Option<Instant> {
        [
            self.text.dirty_since,
            self.title.dirty_since,
            self.lifecycle.dirty_since,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

impl<T> Draft<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            dirty_since: None,
        }
    }

    fn mark_dirty_now(&mut self) {
        self.dirty_since = Some(Instant::now());
    }

    fn mark_dirty_immediate(&mut self, debounce: Duration) {
        let now = Instant::now();
        self.dirty_since = Some(now.checked_sub(debounce).unwrap_or(now));
    }

    fn is_ready(&self, mode: FlushKind, debounce: Duration) -> bool {
        let Some(since) = self.dirty_since else {
            return false;
        };
        match mode {
            FlushKind::Immediate => true,
            FlushKind::Debounced(at) => at.saturating_duration_since(since) >= debounce,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FlushKind {
    Debounced(Instant),
    Immediate,
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::LifecycleUnit;
    use crate::storage::{MemoryKvStore, NoteRepository};
    use crate::store::StoreOptions;

    const TEXT_WINDOW: Duration = Duration::from_millis(2_000);
    const LIFECYCLE_WINDOW: Duration = Duration::from_millis(1_500);

    fn setup() -> (NoteStore, ManualClock, EditSession) {
        let clock = ManualClock::new(datetime!(2024-06-01 09:00 UTC));
        let mut store = NoteStore::new(
            NoteRepository::new(MemoryKvStore::new()),
            Arc::new(clock.clone()),
            StoreOptions::default(),
        );
        store.load();
        let session = EditSession::new(&AutoSaveConfig::default());
        (store, clock, session)
    }

    #[test]
    fn typing_is_coalesced_into_one_update() {
        let (mut store, clock, mut session) = setup();
        let note = store.create("");
        let updates = Rc::new(Cell::new(0));
        let counter = updates.clone();
        let _sub = store.subscribe(move |_| counter.set(counter.get() + 1));

        assert!(session.open(&mut store, &note.id));
        clock.advance(time::Duration::seconds(5));
        for text in ["b", "bi", "bik", "bike"] {
            session.set_text(text);
        }
        assert_eq!(session.poll_at(&mut store, Instant::now()), None);
        assert_matches!(session.status(), EditStatus::Pending { .. });

        let event = session.poll_at(&mut store, Instant::now() + TEXT_WINDOW);
        assert_matches!(event, Some(EditEvent::Saved { .. }));
        assert_eq!(updates.get(), 1);
        let stored = store.find_by_id(&note.id).unwrap();
        assert_eq!(stored.text, "bike");
        assert_eq!(stored.updated_at, note.created_at + 5_000);
        assert_matches!(session.status(), EditStatus::Idle { last_saved_at: Some(_), .. });
    }

    #[test]
    fn lifecycle_window_is_shorter_than_text_window() {
        let (mut store, _clock, mut session) = setup();
        let note = store.create("");
        session.open(&mut store, &note.id);
        session.set_text("later");
        session
            .set_lifecycle(Lifecycle::timed(LifecycleUnit::Day, 3))
            .unwrap();

        session.poll_at(&mut store, Instant::now() + LIFECYCLE_WINDOW);
        let stored = store.find_by_id(&note.id).unwrap().clone();
        assert_eq!(stored.lifecycle, Lifecycle::timed(LifecycleUnit::Day, 3));
        assert_eq!(stored.text, "");
        assert!(session.has_dirty_changes());

        session.poll_at(&mut store, Instant::now() + TEXT_WINDOW);
        assert_eq!(store.find_by_id(&note.id).unwrap().text, "later");
    }

    #[test]
    fn special_lifecycles_skip_the_window() {
        let (mut store, _clock, mut session) = setup();
        let note = store.create("");
        session.open(&mut store, &note.id);
        session.set_lifecycle(Lifecycle::today()).unwrap();

        assert_matches!(
            session.poll_at(&mut store, Instant::now()),
            Some(EditEvent::Saved { .. })
        );
        let stored = store.find_by_id(&note.id).unwrap();
        assert_eq!(stored.lifecycle, Lifecycle::today());
        assert!(stored.expires_at.is_some());
    }

    #[test]
    fn invalid_lifecycle_drafts_are_never_applied() {
        let (mut store, _clock, mut session) = setup();
        let note = store.create("");
        session.open(&mut store, &note.id);

        let err = session
            .set_lifecycle(Lifecycle::timed(LifecycleUnit::Month, 12))
            .unwrap_err();
        assert_eq!(err.to_string(), "enter a number between 1 and 11");
        assert_matches!(
            session.status(),
            EditStatus::Invalid { message, .. } if message.contains("1 and 11")
        );
        assert_eq!(session.flush(&mut store), None);
        assert_eq!(store.find_by_id(&note.id), Some(&note));

        session
            .set_lifecycle(Lifecycle::timed(LifecycleUnit::Month, 2))
            .unwrap();
        assert_matches!(session.status(), EditStatus::Pending { .. });
        session.flush(&mut store);
        assert_eq!(
            store.find_by_id(&note.id).unwrap().lifecycle,
            Lifecycle::timed(LifecycleUnit::Month, 2)
        );
    }

    #[test]
    fn switching_notes_flushes_the_previous_one() {
        let (mut store, _clock, mut session) = setup();
        let first = store.create("one");
        let second = store.create("two");

        session.open(&mut store, &first.id);
        session.set_text("one, edited");
        session.set_title("First");
        assert!(session.open(&mut store, &second.id));

        let stored = store.find_by_id(&first.id).unwrap();
        assert_eq!(stored.text, "one, edited");
        assert_eq!(stored.title, "First");
        assert_eq!(session.note_id(), Some(second.id.as_str()));
    }

    #[test]
    fn drafts_matching_the_note_do_not_touch_it() {
        let (mut store, clock, mut session) = setup();
        let note = store.create("same");
        session.open(&mut store, &note.id);
        clock.advance(time::Duration::minutes(1));
        session.set_text("changed");
        session.set_text("same");

        assert_eq!(session.flush(&mut store), None);
        assert_eq!(store.find_by_id(&note.id).unwrap().updated_at, note.updated_at);
        assert!(!session.has_dirty_changes());
    }

    #[test]
    fn close_flushes_and_ends() {
        let (mut store, _clock, mut session) = setup();
        let note = store.create("");
        session.open(&mut store, &note.id);
        session.set_text("parting words");

        assert_matches!(session.close(&mut store), Some(EditEvent::Saved { .. }));
        assert!(!session.has_active_session());
        assert_eq!(session.status(), EditStatus::Inactive);
        assert_eq!(store.find_by_id(&note.id).unwrap().text, "parting words");
        assert!(!session.set_text("ignored"));
    }

    #[test]
    fn deleted_note_ends_the_session() {
        let (mut store, _clock, mut session) = setup();
        let note = store.create("");
        session.open(&mut store, &note.id);
        session.set_text("orphan");
        store.delete(&note.id);

        assert_eq!(
            session.flush(&mut store),
            Some(EditEvent::Ended {
                note_id: note.id.clone()
            })
        );
        assert!(!session.has_active_session());
    }

    #[test]
    fn opening_a_missing_note_fails() {
        let (mut store, _clock, mut session) = setup();
        assert!(!session.open(&mut store, "missing"));
        assert_eq!(session.status(), EditStatus::Inactive);
    }
}
