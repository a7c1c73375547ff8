//! The entry point a front-end drives.

use std::sync::Arc;

use rootcause::Report;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{info, warn};

use crate::{
    aggregate::{Aggregator, Inputs, Message, MessageBus, UiState},
    catalog::{
        AppsProvider, SettingsProvider,
        apps::AppsCatalog,
        feed,
        files::FilesAdapter,
        index::{IndexLifecycle, IndexPaths, IndexService, IndexState},
        settings::SettingsCatalog,
    },
    history::{HistoryLog, HistoryMerger, HistoryStore},
    items::{DisplayItem, ItemKind},
    open::{ItemOpener, failure_message},
    permission::{AccessOutcome, PermissionPrompt, Rationale, request_permission},
    search::{Tokens, parse},
    tasks::{ComputePool, FatalErrors, TaskScope},
};

/// One history store per item kind.
pub struct HistoryStores {
    pub apps: Arc<dyn HistoryStore>,
    pub settings: Arc<dyn HistoryStore>,
    pub files: Arc<dyn HistoryStore>,
}

/// Everything outside the search core.
pub struct Collaborators {
    pub apps: Arc<dyn AppsProvider>,
    pub settings: Arc<dyn SettingsProvider>,
    pub index: Arc<dyn IndexService>,
    pub history: HistoryStores,
    pub opener: Arc<dyn ItemOpener>,
    pub prompt: Arc<dyn PermissionPrompt>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub index_paths: IndexPaths,
    /// Rebuild the index whenever file access is granted, instead of
    /// reusing the one on disk.
    pub reindex_on_startup: bool,
    pub history_limit: usize,
    pub compute_threads: Option<usize>,
}

struct HistoryLogs {
    apps: Arc<HistoryLog>,
    settings: Arc<HistoryLog>,
    files: Arc<HistoryLog>,
}

impl HistoryLogs {
    fn of(&self, kind: ItemKind) -> &HistoryLog {
        match kind {
            ItemKind::App => &self.apps,
            ItemKind::Setting => &self.settings,
            ItemKind::File => &self.files,
        }
    }
}

pub struct SearchSession {
    scope: TaskScope,
    fatal: Mutex<FatalErrors>,
    bus: MessageBus,
    query: watch::Sender<Tokens>,
    apps: AppsCatalog,
    files: Arc<FilesAdapter>,
    logs: HistoryLogs,
    opener: Arc<dyn ItemOpener>,
    prompt: Arc<dyn PermissionPrompt>,
    reindex_on_startup: bool,
    aggregator: Aggregator,
    // Keeps the settings catalog alive for as long as its feed.
    _settings: SettingsCatalog,
}

impl std::fmt::Debug for SearchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSession")
            .field("query", &*self.query.borrow())
            .field("index", &self.files.index())
            .finish_non_exhaustive()
    }
}

impl SearchSession {
    /// Wires every source into the aggregate and starts loading the
    /// catalogs and histories. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the compute pool can't be started.
    pub fn new(collaborators: Collaborators, config: SessionConfig) -> Result<Self, Report> {
        let (scope, fatal) = TaskScope::new();
        let pool = ComputePool::new(config.compute_threads)?;
        let bus = MessageBus::new();
        let (query, query_rx) = watch::channel(Tokens::from([]));

        let apps = AppsCatalog::new(collaborators.apps, &scope);
        let settings = SettingsCatalog::new(collaborators.settings, &scope);
        let index = Arc::new(IndexLifecycle::new(
            collaborators.index,
            config.index_paths,
            &scope,
        ));
        let files = Arc::new(FilesAdapter::new(index, &scope));

        let limit = config.history_limit;
        let stores = collaborators.history;
        let logs = HistoryLogs {
            apps: Arc::new(HistoryLog::open(ItemKind::App, stores.apps, limit, &scope)),
            settings: Arc::new(HistoryLog::open(ItemKind::Setting, stores.settings, limit, &scope)),
            files: Arc::new(HistoryLog::open(ItemKind::File, stores.files, limit, &scope)),
        };

        let history = HistoryMerger::merge(
            vec![
                apps.history(logs.apps.clone()),
                logs.settings.entries(),
                logs.files.entries(),
            ],
            &scope,
        );
        let inputs = Inputs {
            settings: feed::filtered(&scope, &pool, settings.catalog(), query_rx.clone()),
            apps: feed::filtered(&scope, &pool, apps.catalog(), query_rx.clone()),
            files: feed::weighed_files(&scope, &pool, files.results()),
            query: query_rx,
            history,
        };
        let aggregator = Aggregator::new(&scope, &pool, bus.clone(), inputs);

        Ok(Self {
            scope,
            fatal: Mutex::new(fatal),
            bus,
            query,
            apps,
            files,
            logs,
            opener: collaborators.opener,
            prompt: collaborators.prompt,
            reindex_on_startup: config.reindex_on_startup,
            aggregator,
            _settings: settings,
        })
    }

    /// The user typed. The query is parsed once and handed to every source.
    pub fn on_search_changed(&self, raw: &str) {
        let tokens: Tokens = parse(raw).into();
        self.query.send_replace(tokens.clone());
        self.files.search(tokens);
    }

    /// Asks for file access. Once granted, the index is built (or adopted)
    /// in the background.
    ///
    /// # Errors
    ///
    /// Fails if the permission prompt panicked.
    pub async fn request_file_access(&self) -> Result<AccessOutcome, Report> {
        let outcome = request_permission(self.prompt.clone(), &self.scope).await?;
        match outcome {
            AccessOutcome::Granted => self.grant_file_access(),
            AccessOutcome::Denied => self.files.set_access(false),
            AccessOutcome::NeedsRationale(_) => {}
        }

        Ok(outcome)
    }

    /// Asks again after the rationale was shown.
    ///
    /// # Errors
    ///
    /// Fails if the permission prompt panicked.
    pub async fn retry_file_access(&self, rationale: Rationale) -> Result<bool, Report> {
        let granted = rationale.retry().await?;
        if granted {
            self.grant_file_access();
        } else {
            self.files.set_access(false);
        }

        Ok(granted)
    }

    fn grant_file_access(&self) {
        self.files.set_access(true);
        self.build_index(self.reindex_on_startup);
    }

    /// Rebuilds the file index in the background.
    pub fn reindex(&self) {
        if !self.files.has_access() {
            info!("reindex requested without file access");
            self.bus
                .publish("File access is needed to index files", ItemKind::File);
            return;
        }
        self.build_index(true);
    }

    /// Builds the index, then repeats the current query so the file
    /// results catch up.
    fn build_index(&self, rebuild: bool) {
        let files = self.files.clone();

        self.scope.spawn_fallible(async move {
            let index = files.index();
            let state = if rebuild {
                index.rebuild().await?
            } else {
                index.ensure_built().await?
            };
            info!("file index {state}");

            files.refresh();
            Ok(())
        });
    }

    /// Opens `item`. A success moves it to the top of its history, a
    /// failure is reported on [`SearchSession::messages`].
    pub async fn open(&self, item: DisplayItem) {
        let kind = item.kind();
        let opener = self.opener.clone();
        let target = item.clone();

        match self.scope.blocking(move || opener.open(&target)).await {
            Ok(Ok(())) => self.logs.of(kind).record_use(item),
            Ok(Err(error)) | Err(error) => {
                warn!("failed to open {}: {error}", item.key());
                self.bus.publish(failure_message(kind), kind);
            }
        }
    }

    /// Deletes `item` from the history.
    pub fn forget(&self, item: &DisplayItem) {
        self.logs.of(item.kind()).forget(item);
    }

    /// Re-scans the installed applications.
    pub fn refresh_apps(&self) {
        self.apps.refresh();
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<UiState> {
        self.aggregator.state()
    }

    #[must_use]
    pub fn messages(&self) -> broadcast::Receiver<Message> {
        self.bus.subscribe()
    }

    #[must_use]
    pub fn index_state(&self) -> watch::Receiver<IndexState> {
        self.files.index().state()
    }

    #[must_use]
    pub fn indexed_count(&self) -> watch::Receiver<u64> {
        self.files.index().indexed_count()
    }

    /// Waits for the next unrecoverable error of a background task.
    pub async fn next_fatal(&self) -> Option<Report> {
        self.fatal.lock().await.next().await
    }

    /// Persists pending history writes, then stops every background task.
    pub async fn shutdown(&self) {
        self.logs.apps.flush().await;
        self.logs.settings.flush().await;
        self.logs.files.flush().await;
        self.scope.shutdown().await;
    }
}
