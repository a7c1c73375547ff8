pub mod apps;
pub mod feed;
pub mod files;
pub mod index;
pub mod settings;

use std::{
    error::Error,
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    items::{AppItem, SettingItem},
    tasks::TaskScope,
};

pub type ErrorCause = Arc<dyn Error + Send + Sync>;

/// The state of one source, used the same way by every adapter.
///
/// Once out of `Loading` a source never goes back to it: catalogs are
/// re-fetched wholesale and replace the previous result.
#[derive(Debug, Clone, Default)]
pub enum CatalogResult<T> {
    #[default]
    Loading,
    Success(T),
    Error {
        message: String,
        cause: Option<ErrorCause>,
    },
}

impl<T> CatalogResult<T> {
    pub fn error<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Error {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn map<U>(self, transform: impl FnOnce(T) -> U) -> CatalogResult<U> {
        match self {
            CatalogResult::Loading => CatalogResult::Loading,
            CatalogResult::Success(data) => CatalogResult::Success(transform(data)),
            CatalogResult::Error { message, cause } => CatalogResult::Error { message, cause },
        }
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, CatalogResult::Loading)
    }

    #[must_use]
    pub fn success(&self) -> Option<&T> {
        match self {
            CatalogResult::Success(data) => Some(data),
            _ => None,
        }
    }
}

/// Failures of the external catalog providers.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Lists the installed applications.
pub trait AppsProvider: Send + Sync + 'static {
    /// # Errors
    ///
    /// Fails when the application list can't be read.
    fn installed_apps(&self) -> Result<Vec<AppItem>, CatalogError>;
}

/// Lists the OS configuration screens.
pub trait SettingsProvider: Send + Sync + 'static {
    /// # Errors
    ///
    /// Fails when the settings list can't be read.
    fn settings(&self) -> Result<Vec<SettingItem>, CatalogError>;
}

type Fetch<T> = dyn Fn() -> Result<Vec<T>, CatalogError> + Send + Sync;

/// A catalog that is fetched on a blocking thread and published as a
/// whole. Fetched once at construction, again on [`CatalogSource::refresh`].
///
/// Fetches may overlap; only the most recently started one is published.
pub struct CatalogSource<T> {
    what: &'static str,
    fetch: Arc<Fetch<T>>,
    tx: Arc<watch::Sender<CatalogResult<Arc<[T]>>>>,
    latest: Arc<AtomicU64>,
    scope: TaskScope,
}

impl<T> Debug for CatalogSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogSource")
            .field("what", &self.what)
            .finish_non_exhaustive()
    }
}

impl<T> CatalogSource<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(
        what: &'static str,
        scope: &TaskScope,
        fetch: impl Fn() -> Result<Vec<T>, CatalogError> + Send + Sync + 'static,
    ) -> Self {
        let (tx, _rx) = watch::channel(CatalogResult::Loading);
        let source = Self {
            what,
            fetch: Arc::new(fetch),
            tx: Arc::new(tx),
            latest: Arc::new(AtomicU64::new(0)),
            scope: scope.clone(),
        };
        source.refresh();

        source
    }

    #[must_use]
    pub fn catalog(&self) -> watch::Receiver<CatalogResult<Arc<[T]>>> {
        self.tx.subscribe()
    }

    /// Re-reads the whole catalog in the background.
    pub fn refresh(&self) {
        let what = self.what;
        let fetch = self.fetch.clone();
        let tx = self.tx.clone();
        let latest = self.latest.clone();
        let scope = self.scope.clone();
        let seq = self.latest.fetch_add(1, Ordering::AcqRel) + 1;

        self.scope.spawn(async move {
            let result = match scope.blocking(move || fetch()).await {
                Ok(Ok(items)) => CatalogResult::Success(Arc::from(items)),
                Ok(Err(error)) => {
                    warn!("failed to read {what}: {error}");
                    CatalogResult::error(format!("Failed to read {what}"), error)
                }
                Err(report) => {
                    warn!("reading {what} panicked: {report}");
                    CatalogResult::Error {
                        message: format!("Failed to read {what}"),
                        cause: None,
                    }
                }
            };

            let published = tx.send_if_modified(|current| {
                if latest.load(Ordering::Acquire) != seq {
                    return false;
                }
                *current = result;
                true
            });
            if !published {
                debug!("discarding superseded read of {what} #{seq}");
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fakes of the catalog collaborators.

    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeApps {
        pub apps: Mutex<Vec<AppItem>>,
        pub deny: std::sync::atomic::AtomicBool,
        pub calls: AtomicUsize,
    }

    impl FakeApps {
        pub fn with(apps: Vec<AppItem>) -> Arc<Self> {
            Arc::new(Self {
                apps: Mutex::new(apps),
                ..Default::default()
            })
        }
    }

    impl AppsProvider for FakeApps {
        fn installed_apps(&self) -> Result<Vec<AppItem>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.deny.load(Ordering::SeqCst) {
                return Err(CatalogError::PermissionDenied("apps".into()));
            }
            Ok(self.apps.lock().unwrap().clone())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeSettings {
        pub settings: Vec<SettingItem>,
    }

    impl SettingsProvider for FakeSettings {
        fn settings(&self) -> Result<Vec<SettingItem>, CatalogError> {
            Ok(self.settings.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn map_keeps_errors() {
        let result: CatalogResult<i32> =
            CatalogResult::error("nope", CatalogError::Unavailable("x".into()));
        let mapped = result.map(|n| n * 2);
        assert!(matches!(mapped, CatalogResult::Error { ref message, .. } if message == "nope"));
        assert_eq!(CatalogResult::Success(2).map(|n| n * 2).success(), Some(&4));
        assert!(CatalogResult::<i32>::default().is_loading());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn source_goes_from_loading_to_result_and_refreshes() {
        let (scope, _fatal) = TaskScope::new();
        let flip = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let source = {
            let flip = flip.clone();
            CatalogSource::new("numbers", &scope, move || {
                if flip.load(std::sync::atomic::Ordering::SeqCst) {
                    Err(CatalogError::PermissionDenied("no".into()))
                } else {
                    Ok(vec![1, 2, 3])
                }
            })
        };

        let mut rx = source.catalog();
        let loaded = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|result| !result.is_loading()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(loaded.success().map(|items| items.len()), Some(3));

        flip.store(true, std::sync::atomic::Ordering::SeqCst);
        source.refresh();
        let failed = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|result| matches!(result, CatalogResult::Error { .. })),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert!(matches!(failed, CatalogResult::Error { message, .. } if message == "Failed to read numbers"));

        scope.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_earlier_read_does_not_overwrite_a_later_one() {
        let (scope, _fatal) = TaskScope::new();
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let source = {
            let calls = calls.clone();
            CatalogSource::new("numbers", &scope, move || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    std::thread::sleep(Duration::from_millis(300));
                }
                Ok(vec![call])
            })
        };

        // The first read is in flight before the second one starts.
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        source.refresh();

        let mut rx = source.catalog();
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|result| !result.is_loading()),
        )
        .await
        .unwrap()
        .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(rx.borrow().success().map(|items| items.to_vec()), Some(vec![1]));

        scope.shutdown().await;
    }
}
