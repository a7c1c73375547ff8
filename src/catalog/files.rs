use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    catalog::{
        CatalogResult,
        index::{IndexError, IndexLifecycle},
    },
    items::FileItem,
    search::Tokens,
    tasks::TaskScope,
};

/// The outcome of one file search, tagged with the query that produced it.
#[derive(Debug, Clone, Default)]
pub struct FileSearch {
    pub query: Tokens,
    pub files: CatalogResult<Arc<[FileItem]>>,
}

impl FileSearch {
    fn empty(query: Tokens) -> Self {
        Self {
            query,
            files: CatalogResult::Success(Arc::from([])),
        }
    }
}

/// Searches the filesystem index.
///
/// Searches are not cancelled when a newer one starts, but only the
/// latest one issued is ever published.
#[derive(Debug)]
pub struct FilesAdapter {
    index: Arc<IndexLifecycle>,
    scope: TaskScope,
    access: AtomicBool,
    /// The last query issued, paired with `latest` under this lock.
    query: Mutex<Tokens>,
    latest: Arc<AtomicU64>,
    tx: Arc<watch::Sender<FileSearch>>,
}

impl FilesAdapter {
    pub fn new(index: Arc<IndexLifecycle>, scope: &TaskScope) -> Self {
        Self {
            index,
            scope: scope.clone(),
            access: AtomicBool::new(false),
            query: Mutex::new(Tokens::from([])),
            latest: Arc::new(AtomicU64::new(0)),
            tx: Arc::new(watch::channel(FileSearch::empty(Tokens::from([]))).0),
        }
    }

    #[must_use]
    pub fn index(&self) -> &Arc<IndexLifecycle> {
        &self.index
    }

    /// Whether the user allowed reading the scan root.
    pub fn set_access(&self, granted: bool) {
        self.access.store(granted, Ordering::Release);
    }

    #[must_use]
    pub fn has_access(&self) -> bool {
        self.access.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn results(&self) -> watch::Receiver<FileSearch> {
        self.tx.subscribe()
    }

    /// Issues a search for `tokens`. Without access, without a query or
    /// without a ready index, the result is an immediate empty success.
    pub fn search(&self, tokens: Tokens) {
        let seq = {
            let mut query = self.query.lock().unwrap_or_else(PoisonError::into_inner);
            *query = tokens.clone();
            self.latest.fetch_add(1, Ordering::AcqRel) + 1
        };
        self.issue(seq, tokens);
    }

    /// Repeats the last query, e.g. once the index became ready.
    pub fn refresh(&self) {
        let (seq, tokens) = {
            let query = self.query.lock().unwrap_or_else(PoisonError::into_inner);
            (self.latest.fetch_add(1, Ordering::AcqRel) + 1, query.clone())
        };
        self.issue(seq, tokens);
    }

    fn issue(&self, seq: u64, tokens: Tokens) {
        if tokens.is_empty() || !self.has_access() || !self.index.current().is_ready() {
            publish(&self.tx, &self.latest, seq, FileSearch::empty(tokens));
            return;
        }

        let index = self.index.clone();
        let latest = self.latest.clone();
        let tx = self.tx.clone();

        self.scope.spawn(async move {
            let files = match index.search(&tokens).await {
                Ok(paths) => CatalogResult::Success(
                    paths.iter().map(|path| FileItem::new(path)).collect(),
                ),
                Err(error) => {
                    warn!("file search failed: {error}");
                    file_search_error(error)
                }
            };

            publish(&tx, &latest, seq, FileSearch { query: tokens, files });
        });
    }
}

fn file_search_error(error: IndexError) -> CatalogResult<Arc<[FileItem]>> {
    let message = if error.is_permission_denied() {
        "Permission to read files was denied"
    } else {
        "Failed to search files"
    };
    CatalogResult::error(message, error)
}

/// Publishes `search` if `seq` is still the latest issued request. The
/// check happens under the channel lock, so an older result can never
/// overwrite a newer one.
fn publish(tx: &watch::Sender<FileSearch>, latest: &AtomicU64, seq: u64, search: FileSearch) {
    let published = tx.send_if_modified(|current| {
        if latest.load(Ordering::Acquire) != seq {
            return false;
        }
        *current = search;
        true
    });

    if !published {
        debug!("discarding superseded file search #{seq}");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        catalog::index::{IndexPaths, testing::FakeIndex},
        search::parse,
    };

    async fn ready_adapter(files: &[&str], dir: &std::path::Path) -> (FilesAdapter, TaskScope) {
        let (scope, _fatal) = TaskScope::new();
        let paths = IndexPaths {
            database: dir.join("files.db"),
            scan_root: dir.to_path_buf(),
            temp_dir: dir.to_path_buf(),
        };
        let index = Arc::new(IndexLifecycle::new(FakeIndex::new(files), paths, &scope));
        index.ensure_built().await.unwrap();

        let adapter = FilesAdapter::new(index, &scope);
        adapter.set_access(true);
        (adapter, scope)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn without_access_results_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, scope) = ready_adapter(&["file1"], dir.path()).await;
        adapter.set_access(false);

        let mut results = adapter.results();
        adapter.search(Tokens::from(parse("file")));
        let search = results.borrow_and_update().clone();
        assert_eq!(search.query.len(), 1);
        assert_eq!(search.files.success().map(|f| f.len()), Some(0));

        scope.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn publishes_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, scope) = ready_adapter(&["file1", "file2.mp3", "notes"], dir.path()).await;

        let mut results = adapter.results();
        adapter.search(Tokens::from(parse("file")));
        let search = tokio::time::timeout(
            Duration::from_secs(5),
            results.wait_for(|search| !search.query.is_empty()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();

        let files: Vec<&str> = search
            .files
            .success()
            .unwrap()
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(files, ["file1", "file2.mp3"]);

        scope.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn superseded_results_are_discarded() {
        let (tx, _rx) = watch::channel(FileSearch::default());
        let latest = AtomicU64::new(0);

        let old = latest.fetch_add(1, Ordering::AcqRel) + 1;
        let new = latest.fetch_add(1, Ordering::AcqRel) + 1;

        publish(&tx, &latest, new, FileSearch::empty(Tokens::from(parse("new"))));
        // The older request completes last.
        publish(&tx, &latest, old, FileSearch::empty(Tokens::from(parse("old"))));

        assert_eq!(tx.borrow().query[0].term, "new");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn last_issued_query_wins() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, scope) = ready_adapter(&["alpha", "beta"], dir.path()).await;

        let mut results = adapter.results();
        adapter.search(Tokens::from(parse("alpha")));
        adapter.search(Tokens::from(parse("beta")));

        let search = tokio::time::timeout(
            Duration::from_secs(5),
            results.wait_for(|search| !search.query.is_empty()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(search.query[0].term, "beta");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(results.borrow().query[0].term, "beta");

        scope.shutdown().await;
    }
}
