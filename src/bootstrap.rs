use anyhow::{Context, Result};

use crate::lifecycle::Lifecycle;
use crate::storage::LAUNCHED_BEFORE_KEY;
use crate::store::{Note, NoteStore};

pub const WELCOME_NOTE_ID: &str = "welcome";

const WELCOME_TITLE: &str = "Welcome to tempnotes";

const WELCOME_TEXT: &str = "Welcome to tempnotes!

Notes here can expire on their own. Give a note a lifecycle and it is
removed once its time is up:

- forever: kept until you delete it
- today: gone at the end of the day
- hours, days, weeks, months or years: counted from when the note was created

Pinned notes stay at the top of the list. This one is pinned and never
expires; delete it whenever you like.
";

/// Seeds the welcome note on the first launch. The launched-before flag is
/// the only gate and is read before anything is inserted. Returns whether a
/// note was added.
pub fn seed_welcome_note(store: &mut NoteStore) -> Result<bool> {
    if store
        .repository()
        .load_flag(LAUNCHED_BEFORE_KEY)
        .is_some()
    {
        return Ok(false);
    }

    let now = store.now_millis();
    let inserted = store.insert(Note {
        id: WELCOME_NOTE_ID.to_string(),
        text: WELCOME_TEXT.to_string(),
        title: WELCOME_TITLE.to_string(),
        created_at: now,
        updated_at: now,
        is_pinned: true,
        lifecycle: Lifecycle::forever(),
        expires_at: None,
    });
    if inserted {
        tracing::info!("seeding first-run welcome note");
        store.flush().context("persisting welcome note")?;
    }
    store
        .repository()
        .save_flag(LAUNCHED_BEFORE_KEY, "true")
        .context("recording first launch")?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{KvStore, MemoryKvStore, NoteRepository};
    use crate::store::StoreOptions;

    fn open_store(kv: &MemoryKvStore) -> NoteStore {
        let mut store = NoteStore::new(
            NoteRepository::new(kv.clone()),
            Arc::new(ManualClock::new(datetime!(2024-06-01 09:00 UTC))),
            StoreOptions::default(),
        );
        store.load();
        store
    }

    #[test]
    fn first_launch_seeds_a_pinned_forever_note() -> anyhow::Result<()> {
        let kv = MemoryKvStore::new();
        let mut store = open_store(&kv);
        assert!(seed_welcome_note(&mut store)?);

        let welcome = store.find_by_id(WELCOME_NOTE_ID).expect("welcome note");
        assert!(welcome.is_pinned);
        assert_eq!(welcome.lifecycle, Lifecycle::forever());
        assert_eq!(welcome.expires_at, None);
        assert_eq!(
            store.repository().load_flag(LAUNCHED_BEFORE_KEY).as_deref(),
            Some("true")
        );
        assert!(!store.has_pending_writes());
        Ok(())
    }

    #[test]
    fn persisted_welcome_note_shape() -> anyhow::Result<()> {
        let kv = MemoryKvStore::new();
        let mut store = open_store(&kv);
        seed_welcome_note(&mut store)?;

        let stored: Vec<Note> = serde_json::from_slice(
            &kv.raw(crate::storage::NOTES_KEY).expect("notes written"),
        )?;
        insta::assert_json_snapshot!(stored, { "[].text" => "[text]" }, @r###"
        [
          {
            "id": "welcome",
            "text": "[text]",
            "title": "Welcome to tempnotes",
            "createdAt": 1717232400000,
            "updatedAt": 1717232400000,
            "isPinned": true,
            "lifecycle": {
              "unit": "forever",
              "value": null
            },
            "expiresAt": null
          }
        ]
        "###);
        Ok(())
    }

    #[test]
    fn later_launches_do_nothing() -> anyhow::Result<()> {
        let kv = MemoryKvStore::new();
        let mut store = open_store(&kv);
        seed_welcome_note(&mut store)?;
        store.delete(WELCOME_NOTE_ID);
        store.flush()?;

        let mut reopened = open_store(&kv);
        assert!(!seed_welcome_note(&mut reopened)?);
        assert!(reopened.is_empty());
        Ok(())
    }

    #[test]
    fn seeding_twice_before_the_flag_lands_keeps_one_note() -> anyhow::Result<()> {
        let kv = MemoryKvStore::new();
        let mut store = open_store(&kv);
        seed_welcome_note(&mut store)?;
        kv.remove(LAUNCHED_BEFORE_KEY)?;

        assert!(!seed_welcome_note(&mut store)?);
        assert_eq!(store.len(), 1);
        assert!(store.repository().load_flag(LAUNCHED_BEFORE_KEY).is_some());
        Ok(())
    }

    #[test]
    fn existing_notes_are_kept_alongside_the_welcome_note() -> anyhow::Result<()> {
        let kv = MemoryKvStore::new();
        let mut store = open_store(&kv);
        let mine = store.create("mine");
        seed_welcome_note(&mut store)?;
        let ids: Vec<String> = store.list().into_iter().map(|note| note.id).collect();
        assert_eq!(ids, [WELCOME_NOTE_ID.to_string(), mine.id]);
        Ok(())
    }
}
