use rootcause::Report;
use scc::{Guard, HashIndex};

use crate::history::{HistoryEntry, HistoryStore};

/// Keeps history in memory only. Used when nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    entries: HashIndex<String, HistoryEntry>,
}

impl MemoryHistoryStore {
    #[must_use]
    pub fn with(entries: Vec<HistoryEntry>) -> Self {
        let store = Self::default();
        for entry in entries {
            let _ = store.entries.insert_sync(entry.key().to_owned(), entry);
        }
        store
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self) -> Result<Vec<HistoryEntry>, Report> {
        let mut entries: Vec<HistoryEntry> = {
            let guard = Guard::new();
            self.entries
                .iter(&guard)
                .map(|(_, entry)| entry.clone())
                .collect()
        };
        entries.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));

        Ok(entries)
    }

    fn upsert(&self, entry: &HistoryEntry) -> Result<(), Report> {
        let key = entry.key().to_owned();
        self.entries.remove_sync(&key);
        let _ = self.entries.insert_sync(key, entry.clone());

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), Report> {
        self.entries.remove_sync(key);

        Ok(())
    }
}
