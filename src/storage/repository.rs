use anyhow::{Context, Result};

use super::KvStore;
use crate::settings::AppSettings;
use crate::store::Note;

pub const NOTES_KEY: &str = "notes_storage";
pub const LAUNCHED_BEFORE_KEY: &str = "app_launched_before";
pub const SETTINGS_KEY: &str = "app_settings";

/// Persistence boundary for the note collection, settings and small flags.
/// Reads never fail: missing or unreadable entries degrade to defaults and
/// are logged.
pub struct NoteRepository {
    kv: Box<dyn KvStore>,
}

impl NoteRepository {
    pub fn new<K>(kv: K) -> Self
    where
        K: KvStore + 'static,
    {
        Self { kv: Box::new(kv) }
    }

    pub fn load(&self) -> Vec<Note> {
        let raw = match self.kv.get(NOTES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(?err, "failed to read stored notes, starting empty");
                return Vec::new();
            }
        };
        match serde_json::from_slice::<Vec<Note>>(&raw) {
            Ok(notes) => {
                tracing::debug!(count = notes.len(), "loaded notes");
                notes
            }
            Err(err) => {
                tracing::warn!(%err, "stored notes are malformed, starting empty");
                Vec::new()
            }
        }
    }

    pub fn save(&self, notes: &[Note]) -> Result<()> {
        let json = serde_json::to_vec(notes).context("serialising notes")?;
        self.kv
            .set(NOTES_KEY, &json)
            .with_context(|| format!("saving {} notes", notes.len()))
    }

    pub fn load_flag(&self, key: &str) -> Option<String> {
        let raw = match self.kv.get(key) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(?err, key, "failed to read flag");
                return None;
            }
        };
        // Flags are JSON strings; older writers stored the bare text.
        match serde_json::from_slice::<String>(&raw) {
            Ok(value) => Some(value),
            Err(_) => String::from_utf8(raw).ok(),
        }
    }

    pub fn save_flag(&self, key: &str, value: &str) -> Result<()> {
        let json = serde_json::to_vec(value).context("serialising flag")?;
        self.kv
            .set(key, &json)
            .with_context(|| format!("saving flag {key}"))
    }

    pub fn load_settings(&self) -> AppSettings {
        let raw = match self.kv.get(SETTINGS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return AppSettings::default(),
            Err(err) => {
                tracing::warn!(?err, "failed to read settings, using defaults");
                return AppSettings::default();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|err| {
            tracing::warn!(%err, "stored settings are malformed, using defaults");
            AppSettings::default()
        })
    }

    pub fn save_settings(&self, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_vec(settings).context("serialising settings")?;
        self.kv
            .set(SETTINGS_KEY, &json)
            .context("saving settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Lifecycle, LifecycleUnit};
    use crate::storage::test_support::init_storage;
    use crate::storage::MemoryKvStore;

    fn note(id: &str, pinned: bool, updated_at: i64) -> Note {
        Note {
            id: id.to_string(),
            text: format!("body of {id}"),
            title: String::new(),
            created_at: 1_000,
            updated_at,
            is_pinned: pinned,
            lifecycle: Lifecycle::timed(LifecycleUnit::Hour, 2),
            expires_at: Some(1_000 + 2 * 3_600_000),
        }
    }

    #[test]
    fn missing_key_loads_empty() {
        let repo = NoteRepository::new(MemoryKvStore::new());
        assert!(repo.load().is_empty());
        assert_eq!(repo.load_flag(LAUNCHED_BEFORE_KEY), None);
    }

    #[test]
    fn malformed_payload_loads_empty() {
        let kv = MemoryKvStore::new();
        kv.set(NOTES_KEY, b"{not json").unwrap();
        let repo = NoteRepository::new(kv);
        assert!(repo.load().is_empty());
    }

    #[test]
    fn save_then_load_reproduces_the_set() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let repo = NoteRepository::new(storage);
        let notes = vec![note("a", true, 100), note("b", false, 200)];
        repo.save(&notes)?;

        let mut loaded = repo.load();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded, notes);
        Ok(())
    }

    #[test]
    fn save_overwrites_the_full_snapshot() {
        let kv = MemoryKvStore::new();
        let repo = NoteRepository::new(kv.clone());
        repo.save(&[note("a", false, 1), note("b", false, 2)]).unwrap();
        repo.save(&[note("b", false, 2)]).unwrap();
        let loaded = repo.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "b");
    }

    #[test]
    fn write_failures_surface_as_errors() {
        let kv = MemoryKvStore::new();
        kv.set_fail_writes(true);
        let repo = NoteRepository::new(kv);
        let err = repo.save(&[note("a", false, 1)]).unwrap_err();
        assert!(err.to_string().contains("saving 1 notes"), "{err:#}");
    }

    #[test]
    fn flags_accept_bare_and_json_text() {
        let kv = MemoryKvStore::new();
        let repo = NoteRepository::new(kv.clone());
        repo.save_flag(LAUNCHED_BEFORE_KEY, "true").unwrap();
        assert_eq!(kv.raw(LAUNCHED_BEFORE_KEY).as_deref(), Some(&b"\"true\""[..]));
        assert_eq!(repo.load_flag(LAUNCHED_BEFORE_KEY).as_deref(), Some("true"));

        kv.set(LAUNCHED_BEFORE_KEY, b"true").unwrap();
        assert_eq!(repo.load_flag(LAUNCHED_BEFORE_KEY).as_deref(), Some("true"));
    }

    #[test]
    fn loads_notes_written_by_the_mobile_client() {
        let kv = MemoryKvStore::new();
        kv.set(
            NOTES_KEY,
            r#"[{"id":"1718000000000","text":"bike slot C-5","title":"","createdAt":1718000000000,
                 "updatedAt":1718000000500,"isPinned":false,
                 "lifecycle":{"unit":"日","value":2},"expiresAt":1718172800000}]"#
                .as_bytes(),
        )
        .unwrap();
        let repo = NoteRepository::new(kv);
        let notes = repo.load();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].lifecycle, Lifecycle::timed(LifecycleUnit::Day, 2));
        assert_eq!(notes[0].expires_at, Some(1_718_172_800_000));
    }
}
