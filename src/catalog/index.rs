//! Build/rebuild lifecycle of the filesystem index.
//!
//! ```text
//! Unbuilt -> Building -> Ready
//!               |  ^       |
//!               v  |       | rebuild()
//!             Failed <-----+ (via Building)
//! ```
//!
//! At most one build runs at a time. Searches never wait for a build; they
//! return nothing until the index is `Ready`.

use std::{
    fmt::Display,
    io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use rootcause::{Report, report};
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::{clock, search::SearchQuery, tasks::TaskScope};

/// Failures of the index service.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt index: {0}")]
    Corrupt(String),
}

impl IndexError {
    /// A permission gap the user can fix, as opposed to a broken environment.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            IndexError::PermissionDenied(_) => true,
            IndexError::Io(error) => {
                error.kind() == io::ErrorKind::PermissionDenied
                    || error
                        .to_string()
                        .to_lowercase()
                        .contains("permission denied")
            }
            IndexError::Corrupt(_) => false,
        }
    }
}

/// The external filesystem search engine. Every call blocks.
pub trait IndexService: Send + Sync + 'static {
    /// Scans `scan_root` and writes the index to `database`.
    ///
    /// # Errors
    ///
    /// Fails when the scan root or the database can't be accessed.
    fn build(&self, database: &Path, scan_root: &Path, temp_dir: &Path) -> Result<(), IndexError>;

    /// Paths matching every term, `include[i]` says whether `terms[i]` must
    /// or must not appear.
    ///
    /// # Errors
    ///
    /// Fails when the database can't be read.
    fn search(
        &self,
        database: &Path,
        terms: &[&str],
        include: &[bool],
    ) -> Result<Vec<String>, IndexError>;

    /// # Errors
    ///
    /// Fails when the database can't be read.
    fn stat_indexed_count(&self, database: &Path) -> Result<u64, IndexError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub database: PathBuf,
    pub scan_root: PathBuf,
    pub temp_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    Unbuilt,
    Building,
    Ready { built_at_ms: u64 },
    Failed { reason: String },
}

impl IndexState {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, IndexState::Ready { .. })
    }
}

impl Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexState::Unbuilt => write!(f, "not built"),
            IndexState::Building => write!(f, "building"),
            IndexState::Ready { built_at_ms } => write!(f, "ready (built at {built_at_ms})"),
            IndexState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    /// This caller starts the build.
    Leader,
    /// A build is in flight, wait for it.
    Follower,
}

/// The parts a build task needs after its caller is gone.
struct Shared {
    service: Arc<dyn IndexService>,
    paths: IndexPaths,
    state: watch::Sender<IndexState>,
    indexed_count: watch::Sender<u64>,
    last_built_at: AtomicU64,
}

pub struct IndexLifecycle {
    shared: Arc<Shared>,
    scope: TaskScope,
}

impl std::fmt::Debug for IndexLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexLifecycle")
            .field("paths", &self.shared.paths)
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

impl IndexLifecycle {
    pub fn new(service: Arc<dyn IndexService>, paths: IndexPaths, scope: &TaskScope) -> Self {
        let shared = Shared {
            service,
            paths,
            state: watch::channel(IndexState::Unbuilt).0,
            indexed_count: watch::channel(0).0,
            last_built_at: AtomicU64::new(0),
        };

        Self {
            shared: Arc::new(shared),
            scope: scope.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<IndexState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn current(&self) -> IndexState {
        self.shared.state.borrow().clone()
    }

    /// Number of indexed files, for display.
    #[must_use]
    pub fn indexed_count(&self) -> watch::Receiver<u64> {
        self.shared.indexed_count.subscribe()
    }

    #[must_use]
    pub fn paths(&self) -> &IndexPaths {
        &self.shared.paths
    }

    /// Makes sure an index exists. Does nothing while `Ready` or `Building`;
    /// adopts an index left on disk by an earlier run without rebuilding,
    /// going straight to `Ready`.
    ///
    /// # Errors
    ///
    /// Fails when the build fails for any reason other than a denied
    /// permission, which only moves the state to `Failed`.
    pub async fn ensure_built(&self) -> Result<IndexState, Report> {
        if matches!(self.current(), IndexState::Ready { .. } | IndexState::Building) {
            return Ok(self.current());
        }

        if let Some(state) = self.adopt().await? {
            return Ok(state);
        }

        let claimed = self.shared.state.send_if_modified(|state| {
            if matches!(state, IndexState::Ready { .. } | IndexState::Building) {
                return false;
            }
            *state = IndexState::Building;
            true
        });
        if !claimed {
            return Ok(self.current());
        }

        self.lead().await
    }

    /// Rebuilds the index, even when `Ready`. Joins the build in flight if
    /// there is one.
    ///
    /// # Errors
    ///
    /// Fails when the build fails for any reason other than a denied
    /// permission, which only moves the state to `Failed`.
    pub async fn rebuild(&self) -> Result<IndexState, Report> {
        let mut claim = Claim::Follower;
        self.shared.state.send_if_modified(|state| {
            if *state == IndexState::Building {
                return false;
            }
            *state = IndexState::Building;
            claim = Claim::Leader;
            true
        });

        match claim {
            Claim::Leader => self.lead().await,
            Claim::Follower => self.wait_for_build().await,
        }
    }

    /// Searches the index. Empty until the index is `Ready`.
    ///
    /// # Errors
    ///
    /// Fails when the service can't read the index.
    pub async fn search(&self, tokens: &[SearchQuery]) -> Result<Vec<String>, IndexError> {
        if !self.shared.state.borrow().is_ready() {
            return Ok(Vec::new());
        }

        let shared = self.shared.clone();
        let terms: Vec<String> = tokens.iter().map(|token| token.term.clone()).collect();
        let include: Vec<bool> = tokens.iter().map(SearchQuery::is_include).collect();

        self.scope
            .blocking(move || {
                let database = &shared.paths.database;
                if !database.is_file() {
                    // Removed behind our back, treat as not built yet.
                    warn!("search: database file does not exist");
                    return Ok(Vec::new());
                }

                let started = Instant::now();
                let terms: Vec<&str> = terms.iter().map(String::as_str).collect();
                let files = shared.service.search(database, &terms, &include);
                info!("index search: {} ms", started.elapsed().as_millis());
                files
            })
            .await
            .unwrap_or_else(|report| Err(IndexError::Corrupt(report.to_string())))
    }

    /// Moves `Unbuilt`/`Failed` directly to `Ready` when an index file from
    /// an earlier run exists. `None` when there is nothing to adopt.
    async fn adopt(&self) -> Result<Option<IndexState>, Report> {
        let shared = self.shared.clone();
        let count = self
            .scope
            .blocking(move || {
                let database = &shared.paths.database;
                database
                    .is_file()
                    .then(|| shared.service.stat_indexed_count(database))
            })
            .await?;

        let count = match count {
            None => return Ok(None),
            Some(Ok(count)) => count,
            Some(Err(error)) => {
                warn!("existing index is unreadable, rebuilding: {error}");
                return Ok(None);
            }
        };

        let adopted = self.shared.state.send_if_modified(|state| {
            if !matches!(state, IndexState::Unbuilt | IndexState::Failed { .. }) {
                return false;
            }
            *state = IndexState::Ready {
                built_at_ms: self.shared.next_built_at(),
            };
            true
        });
        if adopted {
            info!("adopted existing index at {}", self.shared.paths.database.display());
            self.shared.indexed_count.send_replace(count);
        }

        Ok(Some(self.current()))
    }

    /// Starts the build claimed by this caller and waits for its outcome.
    ///
    /// The build is owned by the scope: if this future is dropped, the
    /// build still settles the state, and a fatal failure goes to the
    /// scope's [`FatalErrors`](crate::tasks::FatalErrors).
    async fn lead(&self) -> Result<IndexState, Report> {
        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        let scope = self.scope.clone();

        self.scope.spawn_fallible(async move {
            let work = {
                let shared = shared.clone();
                move || shared.build()
            };
            let settled = match scope.blocking(work).await {
                Ok(outcome) => shared.settle(outcome),
                Err(report) => {
                    shared.fail("index build panicked");
                    Err(report)
                }
            };

            match tx.send(settled) {
                Ok(()) | Err(Ok(_)) => Ok(()),
                Err(Err(report)) => Err(report),
            }
        });

        rx.await
            .map_err(|_| report!("index build stopped before it finished"))?
    }

    async fn wait_for_build(&self) -> Result<IndexState, Report> {
        let mut rx = self.shared.state.subscribe();
        let state = rx
            .wait_for(|state| *state != IndexState::Building)
            .await
            .map_err(|_| report!("index lifecycle dropped during build"))?;

        Ok(state.clone())
    }
}

impl Shared {
    /// Blocking. Builds the index and counts what it holds.
    fn build(&self) -> Result<u64, IndexError> {
        let paths = &self.paths;
        let started = Instant::now();
        self.service
            .build(&paths.database, &paths.scan_root, &paths.temp_dir)?;
        info!("index build: {} ms", started.elapsed().as_millis());

        self.service.stat_indexed_count(&paths.database)
    }

    /// Leaves `Building` according to how the build went.
    fn settle(&self, outcome: Result<u64, IndexError>) -> Result<IndexState, Report> {
        match outcome {
            Ok(count) => {
                self.indexed_count.send_replace(count);
                let state = IndexState::Ready {
                    built_at_ms: self.next_built_at(),
                };
                self.state.send_replace(state.clone());
                Ok(state)
            }
            Err(error) if error.is_permission_denied() => {
                error!("index build: {error}");
                let state = IndexState::Failed {
                    reason: error.to_string(),
                };
                self.state.send_replace(state.clone());
                Ok(state)
            }
            Err(error) => {
                self.fail(&error.to_string());
                Err(report!(error).attach("index build failed").into())
            }
        }
    }

    fn fail(&self, reason: &str) {
        self.state.send_replace(IndexState::Failed {
            reason: reason.to_owned(),
        });
    }

    /// Wall-clock time, but never equal to or behind the previous build.
    fn next_built_at(&self) -> u64 {
        let now = clock::now_unix_ms();
        let previous = self
            .last_built_at
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);

        now.max(previous + 1)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A scripted index service.

    use std::sync::{
        Condvar, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// Holds builds until opened.
    #[derive(Debug, Default)]
    pub struct Gate {
        open: Mutex<bool>,
        changed: Condvar,
    }

    impl Gate {
        pub fn closed() -> Self {
            Self::default()
        }

        pub fn opened() -> Self {
            Self {
                open: Mutex::new(true),
                changed: Condvar::new(),
            }
        }

        pub fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.changed.notify_all();
        }

        pub fn close(&self) {
            *self.open.lock().unwrap() = false;
        }

        fn pass(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.changed.wait(open).unwrap();
            }
        }
    }

    pub enum BuildOutcome {
        Succeed,
        DenyPermission,
        Break,
    }

    /// `gate` holds builds and counts, `search_gate` holds searches.
    pub struct FakeIndex {
        pub gate: Gate,
        pub search_gate: Gate,
        pub outcome: Mutex<BuildOutcome>,
        pub files: Mutex<Vec<String>>,
        pub builds: AtomicUsize,
        pub searches: AtomicUsize,
    }

    impl FakeIndex {
        pub fn new(files: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                gate: Gate::opened(),
                search_gate: Gate::opened(),
                outcome: Mutex::new(BuildOutcome::Succeed),
                files: Mutex::new(files.iter().map(|f| (*f).to_owned()).collect()),
                builds: AtomicUsize::new(0),
                searches: AtomicUsize::new(0),
            })
        }

        pub fn gated(files: &[&str]) -> Arc<Self> {
            let mut index = Self::new(files);
            Arc::get_mut(&mut index).unwrap().gate = Gate::closed();
            index
        }

        pub fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    impl IndexService for FakeIndex {
        fn build(&self, database: &Path, _scan_root: &Path, _temp_dir: &Path) -> Result<(), IndexError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.gate.pass();
            match *self.outcome.lock().unwrap() {
                BuildOutcome::Succeed => {
                    std::fs::write(database, self.files.lock().unwrap().join("\n"))?;
                    Ok(())
                }
                BuildOutcome::DenyPermission => Err(IndexError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "Permission denied (os error 13)",
                ))),
                BuildOutcome::Break => Err(IndexError::Corrupt("broken pipe to indexer".into())),
            }
        }

        fn search(&self, _database: &Path, terms: &[&str], include: &[bool]) -> Result<Vec<String>, IndexError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.search_gate.pass();
            let tokens: Vec<SearchQuery> = terms
                .iter()
                .zip(include)
                .map(|(term, include)| {
                    if *include {
                        SearchQuery::include(*term)
                    } else {
                        SearchQuery::exclude(*term)
                    }
                })
                .collect();
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .filter(|file| crate::search::filter::is_match(file, &tokens))
                .cloned()
                .collect())
        }

        fn stat_indexed_count(&self, _database: &Path) -> Result<u64, IndexError> {
            self.gate.pass();
            Ok(self.files.lock().unwrap().len() as u64)
        }
    }

    pub fn paths(dir: &Path) -> IndexPaths {
        IndexPaths {
            database: dir.join("files.db"),
            scan_root: dir.to_path_buf(),
            temp_dir: dir.join("tmp"),
        }
    }
}
