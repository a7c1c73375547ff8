//! Usage history, one log per item kind.
//!
//! A [`HistoryLog`] keeps "most recent use" per item key: using an item
//! again overwrites its entry instead of appending. Changes are visible on
//! [`HistoryLog::entries`] immediately and persisted in the background, in
//! the order they were made.

pub mod merge;
pub mod store;

use std::sync::Arc;

use rootcause::Report;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::{
    clock,
    items::{DisplayItem, ItemKind},
    tasks::TaskScope,
};

pub use self::{merge::HistoryMerger, store::MemoryHistoryStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub item: DisplayItem,
    pub updated_at_ms: u64,
}

impl HistoryEntry {
    #[must_use]
    pub fn at(item: DisplayItem, updated_at_ms: u64) -> Self {
        Self {
            item,
            updated_at_ms,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.item.key()
    }
}

/// Where history entries are persisted. Every call blocks.
pub trait HistoryStore: Send + Sync + 'static {
    /// Every entry, most recent first.
    ///
    /// # Errors
    ///
    /// Fails when the store can't be read.
    fn load(&self) -> Result<Vec<HistoryEntry>, Report>;

    /// Inserts `entry`, replacing the entry with the same key.
    ///
    /// # Errors
    ///
    /// Fails when the store can't be written.
    fn upsert(&self, entry: &HistoryEntry) -> Result<(), Report>;

    /// # Errors
    ///
    /// Fails when the store can't be written.
    fn delete(&self, key: &str) -> Result<(), Report>;
}

pub type Entries = Option<Arc<[HistoryEntry]>>;

#[derive(Debug)]
enum Write {
    Upsert {
        entry: HistoryEntry,
        /// The change hadn't been shown yet because history wasn't loaded.
        publish: bool,
    },
    Delete {
        key: String,
        publish: bool,
    },
    Flush(oneshot::Sender<()>),
}

/// The history of one item kind.
#[derive(Debug)]
pub struct HistoryLog {
    kind: ItemKind,
    limit: usize,
    entries: Arc<watch::Sender<Entries>>,
    writes: mpsc::UnboundedSender<Write>,
}

impl HistoryLog {
    /// Loads the history of `kind` from `store` in the background. At most
    /// `limit` entries are kept; the oldest are evicted first.
    pub fn open(kind: ItemKind, store: Arc<dyn HistoryStore>, limit: usize, scope: &TaskScope) -> Self {
        let (writes, queue) = mpsc::unbounded_channel();
        let entries = Arc::new(watch::channel(None).0);

        scope.spawn(write_loop(
            kind,
            store,
            limit,
            entries.clone(),
            queue,
            scope.clone(),
        ));

        Self {
            kind,
            limit,
            entries,
            writes,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Entries most recent first. `None` until loaded.
    #[must_use]
    pub fn entries(&self) -> watch::Receiver<Entries> {
        self.entries.subscribe()
    }

    /// Records that `item` was just used.
    pub fn record_use(&self, item: DisplayItem) {
        self.record(HistoryEntry::at(item, clock::now_unix_ms()));
    }

    pub fn record(&self, entry: HistoryEntry) {
        let limit = self.limit;
        let publish = !self.apply(|entries| {
            upsert(entries, entry.clone(), limit);
        });
        self.queue(Write::Upsert { entry, publish });
    }

    /// Removes `item` from the history.
    pub fn forget(&self, item: &DisplayItem) {
        let key = item.key().to_owned();
        let publish = !self.apply(|entries| {
            remove(entries, &key);
        });
        self.queue(Write::Delete { key, publish });
    }

    /// Waits until every change made so far is persisted.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        self.queue(Write::Flush(ack));
        let _ = done.await;
    }

    /// Applies `change` to the published entries if they are loaded.
    fn apply(&self, change: impl FnOnce(&mut Vec<HistoryEntry>)) -> bool {
        apply(&self.entries, change)
    }

    fn queue(&self, write: Write) {
        if self.writes.send(write).is_err() {
            debug!("{} history is closed, dropping write", self.kind);
        }
    }
}

fn apply(entries: &watch::Sender<Entries>, change: impl FnOnce(&mut Vec<HistoryEntry>)) -> bool {
    entries.send_if_modified(|current| {
        let Some(loaded) = current else {
            return false;
        };
        let mut updated = loaded.to_vec();
        change(&mut updated);
        *current = Some(updated.into());
        true
    })
}

fn upsert(entries: &mut Vec<HistoryEntry>, entry: HistoryEntry, limit: usize) -> Vec<HistoryEntry> {
    remove(entries, entry.key());
    entries.insert(0, entry);
    if entries.len() > limit {
        entries.split_off(limit)
    } else {
        Vec::new()
    }
}

fn remove(entries: &mut Vec<HistoryEntry>, key: &str) {
    entries.retain(|entry| entry.key() != key);
}

/// The single writer of a log: persists writes one at a time, in order.
async fn write_loop(
    kind: ItemKind,
    store: Arc<dyn HistoryStore>,
    limit: usize,
    entries: Arc<watch::Sender<Entries>>,
    mut queue: mpsc::UnboundedReceiver<Write>,
    scope: TaskScope,
) {
    let mut persisted = {
        let store = store.clone();
        match scope.blocking(move || store.load()).await {
            Ok(Ok(mut loaded)) => {
                loaded.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));
                loaded
            }
            Ok(Err(error)) | Err(error) => {
                warn!("failed to load {kind} history: {error}");
                Vec::new()
            }
        }
    };

    let mut evicted = if persisted.len() > limit {
        persisted.split_off(limit)
    } else {
        Vec::new()
    };
    entries.send_replace(Some(persisted.clone().into()));
    evict(&scope, &store, kind, &mut evicted).await;

    while let Some(write) = queue.recv().await {
        match write {
            Write::Upsert { entry, publish } => {
                if publish {
                    apply(&entries, |current| {
                        upsert(current, entry.clone(), limit);
                    });
                }
                evicted.extend(upsert(&mut persisted, entry.clone(), limit));
                persist(&scope, &store, kind, move |store| store.upsert(&entry)).await;
            }
            Write::Delete { key, publish } => {
                if publish {
                    apply(&entries, |current| remove(current, &key));
                }
                remove(&mut persisted, &key);
                persist(&scope, &store, kind, move |store| store.delete(&key)).await;
            }
            Write::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        }

        evict(&scope, &store, kind, &mut evicted).await;
    }
}

async fn evict(
    scope: &TaskScope,
    store: &Arc<dyn HistoryStore>,
    kind: ItemKind,
    evicted: &mut Vec<HistoryEntry>,
) {
    for entry in evicted.drain(..) {
        debug!("evicting {} from {kind} history", entry.key());
        let key = entry.key().to_owned();
        persist(scope, store, kind, move |store| store.delete(&key)).await;
    }
}

async fn persist<F>(scope: &TaskScope, store: &Arc<dyn HistoryStore>, kind: ItemKind, write: F)
where
    F: FnOnce(&dyn HistoryStore) -> Result<(), Report> + Send + 'static,
{
    let store = store.clone();
    match scope.blocking(move || write(store.as_ref())).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) | Err(error) => warn!("failed to write {kind} history: {error}"),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A history store that counts what it is asked to do.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    pub struct CountingStore {
        pub inner: MemoryHistoryStore,
        pub upserts: AtomicUsize,
        pub deletes: AtomicUsize,
    }

    impl CountingStore {
        pub fn with(entries: Vec<HistoryEntry>) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryHistoryStore::with(entries),
                ..Default::default()
            })
        }
    }

    impl HistoryStore for CountingStore {
        fn load(&self) -> Result<Vec<HistoryEntry>, Report> {
            self.inner.load()
        }

        fn upsert(&self, entry: &HistoryEntry) -> Result<(), Report> {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            self.inner.upsert(entry)
        }

        fn delete(&self, key: &str) -> Result<(), Report> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::Ordering, time::Duration};

    use super::{testing::CountingStore, *};
    use crate::items::FileItem;

    fn file(path: &str) -> DisplayItem {
        DisplayItem::File(FileItem::new(path))
    }

    async fn loaded(log: &HistoryLog) -> Arc<[HistoryEntry]> {
        let mut rx = log.entries();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(Option::is_some))
            .await
            .unwrap()
            .unwrap()
            .clone()
            .unwrap()
    }

    fn keys(entries: &[HistoryEntry]) -> Vec<&str> {
        entries.iter().map(HistoryEntry::key).collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loads_most_recent_first() {
        let (scope, _fatal) = TaskScope::new();
        let store = CountingStore::with(vec![
            HistoryEntry::at(file("old"), 1),
            HistoryEntry::at(file("new"), 9),
        ]);
        let log = HistoryLog::open(ItemKind::File, store, 10, &scope);

        assert_eq!(keys(&loaded(&log).await), ["new", "old"]);
        scope.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reuse_overwrites_instead_of_appending() {
        let (scope, _fatal) = TaskScope::new();
        let store = CountingStore::with(vec![
            HistoryEntry::at(file("a"), 2),
            HistoryEntry::at(file("b"), 1),
        ]);
        let log = HistoryLog::open(ItemKind::File, store.clone(), 10, &scope);
        loaded(&log).await;

        log.record(HistoryEntry::at(file("b"), 3));
        assert_eq!(keys(&loaded(&log).await), ["b", "a"]);

        log.flush().await;
        assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
        assert_eq!(keys(&store.load().unwrap()), ["b", "a"]);
        scope.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn forget_is_visible_before_it_is_persisted() {
        let (scope, _fatal) = TaskScope::new();
        let store = CountingStore::with(vec![HistoryEntry::at(file("a"), 1)]);
        let log = HistoryLog::open(ItemKind::File, store.clone(), 10, &scope);
        loaded(&log).await;

        log.forget(&file("a"));
        assert!(log.entries().borrow().as_ref().unwrap().is_empty());

        log.flush().await;
        assert!(store.load().unwrap().is_empty());
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        scope.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oldest_entries_are_evicted_at_the_limit() {
        let (scope, _fatal) = TaskScope::new();
        let store = CountingStore::with(Vec::new());
        let log = HistoryLog::open(ItemKind::File, store.clone(), 2, &scope);
        loaded(&log).await;

        log.record(HistoryEntry::at(file("one"), 1));
        log.record(HistoryEntry::at(file("two"), 2));
        log.record(HistoryEntry::at(file("three"), 3));
        assert_eq!(keys(&loaded(&log).await), ["three", "two"]);

        log.flush().await;
        assert_eq!(keys(&store.load().unwrap()), ["three", "two"]);
        assert_eq!(store.deletes.load(Ordering::SeqCst), 1);
        scope.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_before_load_are_kept() {
        let (scope, _fatal) = TaskScope::new();
        let store = CountingStore::with(vec![HistoryEntry::at(file("stored"), 1)]);
        let log = HistoryLog::open(ItemKind::File, store.clone(), 10, &scope);

        // Possibly before the initial load finished.
        log.record(HistoryEntry::at(file("early"), 5));
        log.flush().await;

        assert_eq!(keys(&loaded(&log).await), ["early", "stored"]);
        scope.shutdown().await;
    }
}
