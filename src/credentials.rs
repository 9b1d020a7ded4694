//! Authorized persons and RFID cards
//!
//! The enrolled sets live outside the core; the pipeline only asks for
//! membership. Stores can be reloaded while a session runs: lookups see
//! either the old or the new set, never a mix.

use crate::error::{AccessError, Result};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub trait CredentialStore: Send + Sync {
    fn is_authorized_person(&self, label: &str) -> bool;

    /// Label of an authorized card, `None` when the token is not enrolled.
    fn card_label(&self, token: &str) -> Option<String>;

    fn is_authorized_card(&self, token: &str) -> bool {
        self.card_label(token).is_some()
    }

    /// Re-read the backing storage. A failed reload keeps the previous sets.
    fn reload(&self) -> Result<()> {
        Ok(())
    }
}

/// Card ids are the decimal strings the readers emit, 8 to 12 digits.
pub fn is_valid_card_id(token: &str) -> bool {
    (8..=12).contains(&token.len()) && token.chars().all(|c| c.is_ascii_digit())
}

#[derive(Debug, Default)]
struct CredentialSets {
    persons: HashSet<String>,
    cards: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    sets: RwLock<CredentialSets>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<P, C, K, L>(persons: P, cards: C) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        C: IntoIterator<Item = (K, L)>,
        K: Into<String>,
        L: Into<String>,
    {
        let store = Self::new();
        store.replace(
            persons.into_iter().map(Into::into).collect(),
            cards
                .into_iter()
                .map(|(k, l)| (k.into(), l.into()))
                .collect(),
        );
        store
    }

    pub fn add_person(&self, name: impl Into<String>) {
        let name = name.into();
        info!("Added authorized person: {}", name);
        self.write().persons.insert(name);
    }

    pub fn remove_person(&self, name: &str) -> bool {
        let removed = self.write().persons.remove(name);
        if removed {
            info!("Removed authorized person: {}", name);
        }
        removed
    }

    pub fn add_card(&self, token: impl Into<String>, label: impl Into<String>) {
        self.write().cards.insert(token.into(), label.into());
    }

    pub fn replace(&self, persons: HashSet<String>, cards: HashMap<String, String>) {
        let mut sets = self.write();
        sets.persons = persons;
        sets.cards = cards;
    }

    pub fn counts(&self) -> (usize, usize) {
        let sets = self.read();
        (sets.persons.len(), sets.cards.len())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CredentialSets> {
        self.sets.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CredentialSets> {
        self.sets.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn is_authorized_person(&self, label: &str) -> bool {
        self.read().persons.contains(label)
    }

    fn card_label(&self, token: &str) -> Option<String> {
        self.read().cards.get(token).cloned()
    }
}

/// Store backed by two JSON files: an array of person names and an object
/// mapping card id to a human readable label.
#[derive(Debug)]
pub struct JsonCredentialStore {
    persons_file: PathBuf,
    cards_file: PathBuf,
    sets: InMemoryCredentialStore,
}

impl JsonCredentialStore {
    /// Load both files. Missing or malformed files are fatal here, at startup.
    pub fn open(persons_file: &Path, cards_file: &Path) -> Result<Self> {
        let store = Self {
            persons_file: persons_file.to_path_buf(),
            cards_file: cards_file.to_path_buf(),
            sets: InMemoryCredentialStore::new(),
        };
        store.load()?;
        let (persons, cards) = store.sets.counts();
        info!(
            "Credential store loaded: {} authorized persons, {} authorized cards",
            persons, cards
        );
        Ok(store)
    }

    fn load(&self) -> Result<()> {
        let persons: Vec<String> = read_json(&self.persons_file)?;
        let cards: HashMap<String, String> = read_json(&self.cards_file)?;

        if let Some(bad) = cards.keys().find(|id| !is_valid_card_id(id)) {
            return Err(AccessError::configuration(format!(
                "{}: card id {:?} must be 8-12 digits",
                self.cards_file.display(),
                bad
            )));
        }

        self.sets.replace(persons.into_iter().collect(), cards);
        Ok(())
    }
}

impl CredentialStore for JsonCredentialStore {
    fn is_authorized_person(&self, label: &str) -> bool {
        self.sets.is_authorized_person(label)
    }

    fn card_label(&self, token: &str) -> Option<String> {
        self.sets.card_label(token)
    }

    fn reload(&self) -> Result<()> {
        match self.load() {
            Ok(()) => {
                let (persons, cards) = self.sets.counts();
                info!("Credentials reloaded: {} persons, {} cards", persons, cards);
                Ok(())
            }
            Err(e) => {
                warn!("Credential reload failed, keeping previous sets: {}", e);
                Err(e)
            }
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AccessError::configuration(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| AccessError::configuration(format!("invalid {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "biolock-credentials-{}-{}",
            tag,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_in_memory_membership() {
        let store = InMemoryCredentialStore::with_entries(["alice"], [("1234567890", "Admin Card")]);

        assert!(store.is_authorized_person("alice"));
        assert!(!store.is_authorized_person("mallory"));
        assert_eq!(store.card_label("1234567890").as_deref(), Some("Admin Card"));
        assert!(!store.is_authorized_card("0000000000"));

        assert!(store.remove_person("alice"));
        assert!(!store.is_authorized_person("alice"));
    }

    #[test]
    fn test_card_id_validation() {
        assert!(is_valid_card_id("1234567890"));
        assert!(is_valid_card_id("12345678"));
        assert!(!is_valid_card_id("1234567"));
        assert!(!is_valid_card_id("12345678901234"));
        assert!(!is_valid_card_id("12345abcde"));
    }

    #[test]
    fn test_json_store_missing_file_is_fatal() {
        let dir = scratch_dir("missing");
        let err = JsonCredentialStore::open(&dir.join("nope.json"), &dir.join("nope2.json"))
            .unwrap_err();
        assert!(matches!(err, AccessError::Configuration(_)));
    }

    #[test]
    fn test_json_store_reload_keeps_previous_on_error() {
        let dir = scratch_dir("reload");
        let persons = dir.join("persons.json");
        let cards = dir.join("cards.json");
        std::fs::write(&persons, r#"["alice"]"#).unwrap();
        std::fs::write(&cards, r#"{ "1234567890": "Admin Card" }"#).unwrap();

        let store = JsonCredentialStore::open(&persons, &cards).unwrap();
        assert!(store.is_authorized_person("alice"));

        std::fs::write(&persons, r#"["alice", "bob"]"#).unwrap();
        store.reload().unwrap();
        assert!(store.is_authorized_person("bob"));

        std::fs::write(&cards, r#"{ "12ab": "Broken" }"#).unwrap();
        assert!(store.reload().is_err());
        assert!(store.is_authorized_person("bob"));
        assert!(store.is_authorized_card("1234567890"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
