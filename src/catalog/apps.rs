use std::{collections::HashSet, sync::Arc};

use tokio::sync::watch;
use tracing::info;

use crate::{
    catalog::{AppsProvider, CatalogResult, CatalogSource},
    history::{HistoryEntry, HistoryLog},
    items::{AppItem, DisplayItem},
    tasks::TaskScope,
};

/// The installed applications.
#[derive(Debug)]
pub struct AppsCatalog {
    source: CatalogSource<AppItem>,
    scope: TaskScope,
}

impl AppsCatalog {
    pub fn new(provider: Arc<dyn AppsProvider>, scope: &TaskScope) -> Self {
        let source = CatalogSource::new("apps", scope, move || {
            provider.installed_apps().map(dedupe_by_id)
        });

        Self {
            source,
            scope: scope.clone(),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> watch::Receiver<CatalogResult<Arc<[AppItem]>>> {
        self.source.catalog()
    }

    /// Re-scan, e.g. after apps were installed or removed.
    pub fn refresh(&self) {
        self.source.refresh();
    }

    /// The app history, resolved against the live catalog.
    ///
    /// Entries whose app no longer exists are dropped and deleted from the
    /// log. Entries that do resolve pick up the catalog's current icon.
    /// Nothing is emitted while the catalog is loading. If the catalog
    /// failed, entries pass through unresolved rather than being deleted.
    #[must_use]
    pub fn history(&self, log: Arc<HistoryLog>) -> watch::Receiver<Option<Arc<[HistoryEntry]>>> {
        let (tx, rx) = watch::channel(None);
        let mut catalog = self.source.catalog();
        let mut entries = log.entries();

        self.scope.spawn(async move {
            loop {
                let apps = catalog.borrow_and_update().clone();
                let current = entries.borrow_and_update().clone();

                if let Some(current) = current {
                    match apps {
                        CatalogResult::Loading => {}
                        CatalogResult::Error { .. } => {
                            tx.send_replace(Some(current));
                        }
                        CatalogResult::Success(apps) => {
                            let (resolved, stale) = resolve(&apps, &current);
                            for entry in stale {
                                // If the application was uninstalled it is no
                                // longer resolvable.
                                info!("removing uninstalled app {} from history", entry.item.key());
                                log.forget(&entry.item);
                            }
                            tx.send_replace(Some(resolved.into()));
                        }
                    }
                }

                tokio::select! {
                    Ok(()) = catalog.changed() => {}
                    Ok(()) = entries.changed() => {}
                    else => break,
                }
            }
        });

        rx
    }
}

/// Some systems report the same launcher entry more than once.
fn dedupe_by_id(apps: Vec<AppItem>) -> Vec<AppItem> {
    let mut seen = HashSet::with_capacity(apps.len());
    apps.into_iter()
        .filter(|app| seen.insert(app.id.clone()))
        .collect()
}

fn resolve(apps: &[AppItem], entries: &[HistoryEntry]) -> (Vec<HistoryEntry>, Vec<HistoryEntry>) {
    let mut resolved = Vec::with_capacity(entries.len());
    let mut stale = Vec::new();

    for entry in entries {
        let DisplayItem::App(app) = &entry.item else {
            resolved.push(entry.clone());
            continue;
        };

        match apps.iter().find(|live| live.id == app.id) {
            Some(live) => resolved.push(HistoryEntry {
                item: DisplayItem::App(live.clone()),
                updated_at_ms: entry.updated_at_ms,
            }),
            None => stale.push(entry.clone()),
        }
    }

    (resolved, stale)
}
