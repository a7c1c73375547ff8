//! Not really a "database", naive use of filesystem is good enough
//! for our use case

use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use rootcause::{Report, report};

use crate::history::{HistoryEntry, HistoryStore};

type Entries = BTreeMap<String, HistoryEntry>;

/// Very naive way of storing history on the filesystem, one JSON file per
/// item kind. Two assumptions about our use case to justify this choice:
///
/// 1) Histories are capped to a few hundred entries, everything fits in
///    memory just fine
///
/// 2) Writes happen after the user picked a result, off the query path, so
///    rewriting the whole file isn't noticeable
#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    // One writer at a time, the file is rewritten as a whole.
    lock: Mutex<()>,
}

impl JsonHistoryStore {
    #[must_use]
    pub fn open(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<Entries, Report> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Entries::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).map_err(|error| {
                report!(error).attach(format!("parsing {}", self.path.display()))
            })?),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Entries::new()),
            Err(error) => Err(report!(error)
                .attach(format!("reading {}", self.path.display()))
                .into()),
        }
    }

    /// Replaces the file through a rename so a crash mid-write keeps the
    /// previous version.
    fn write(&self, entries: &Entries) -> Result<(), Report> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let staged = self.path.with_extension("json.tmp");
        fs::write(&staged, serde_json::to_vec(entries)?)?;
        fs::rename(&staged, &self.path)?;

        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut Entries)) -> Result<(), Report> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read()?;
        change(&mut entries);
        self.write(&entries)
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load(&self) -> Result<Vec<HistoryEntry>, Report> {
        let mut entries: Vec<HistoryEntry> = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.read()?.into_values().collect()
        };
        entries.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));

        Ok(entries)
    }

    fn upsert(&self, entry: &HistoryEntry) -> Result<(), Report> {
        self.modify(|entries| {
            entries.insert(entry.key().to_owned(), entry.clone());
        })
    }

    fn delete(&self, key: &str) -> Result<(), Report> {
        self.modify(|entries| {
            entries.remove(key);
        })
    }
}
