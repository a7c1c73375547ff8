//! Per-source result streams: a catalog (or a file search) combined with the
//! current query, filtered and weighed on the compute pool.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::error;

use crate::{
    catalog::{CatalogResult, files::FileSearch},
    items::{DisplayItem, DisplayName, WeightedItem},
    search::{Tokens, filter, weigh_all},
    tasks::{ComputePool, TaskScope},
};

/// Weighted matches of one source.
pub type Results = CatalogResult<Arc<[WeightedItem]>>;

/// What each source hands the aggregator: its results and the query they
/// were computed for.
#[derive(Debug, Clone, Default)]
pub struct Answer {
    pub query: Tokens,
    pub results: Results,
}

impl Answer {
    #[must_use]
    pub fn new(query: Tokens, results: Results) -> Self {
        Self { query, results }
    }

    /// Whether this is the answer to `query`. A failed source has nothing
    /// query specific, so its error answers any query.
    #[must_use]
    pub fn answers(&self, query: &Tokens) -> bool {
        match self.results {
            CatalogResult::Loading => false,
            CatalogResult::Error { .. } => true,
            CatalogResult::Success(_) => self.query[..] == query[..],
        }
    }
}

/// Filters a static catalog against the latest query.
///
/// Recomputes whenever either side changes. An error is only forwarded
/// when the catalog itself produced it, so a query change doesn't repeat
/// an error that was already reported.
pub fn filtered<T>(
    scope: &TaskScope,
    pool: &ComputePool,
    mut catalog: watch::Receiver<CatalogResult<Arc<[T]>>>,
    mut query: watch::Receiver<Tokens>,
) -> watch::Receiver<Answer>
where
    T: DisplayName + Clone + Into<DisplayItem> + Send + Sync + 'static,
{
    let (tx, rx) = watch::channel(Answer::default());
    let pool = pool.clone();

    scope.spawn(async move {
        let mut catalog_fired = true;
        loop {
            // `changed()` marks the value seen, so the branch that fired is
            // tracked separately from a change that raced with it.
            let catalog_changed = catalog_fired || catalog.has_changed().unwrap_or(false);
            let items = catalog.borrow_and_update().clone();
            let tokens = query.borrow_and_update().clone();

            match items {
                CatalogResult::Loading => {}
                CatalogResult::Error { message, cause } => {
                    if catalog_changed {
                        tx.send_replace(Answer::new(tokens, CatalogResult::Error { message, cause }));
                    }
                }
                CatalogResult::Success(items) => {
                    let weighted = {
                        let tokens = tokens.clone();
                        pool.run(move || {
                            filter(items.iter(), &tokens)
                                .map(WeightedItem::into_display)
                                .collect::<Arc<[_]>>()
                        })
                        .await
                    };

                    match weighted {
                        Ok(weighted) => {
                            tx.send_replace(Answer::new(tokens, CatalogResult::Success(weighted)));
                        }
                        Err(report) => error!("filtering failed: {report}"),
                    }
                }
            }

            tokio::select! {
                Ok(()) = catalog.changed() => catalog_fired = true,
                Ok(()) = query.changed() => catalog_fired = false,
                else => break,
            }
        }
    });

    rx
}

/// Weighs file search results. The index already did the matching.
///
/// Each answer keeps the query of the search it came from, which may be
/// older than the current one while a search is in flight.
pub fn weighed_files(
    scope: &TaskScope,
    pool: &ComputePool,
    mut files: watch::Receiver<FileSearch>,
) -> watch::Receiver<Answer> {
    let (tx, rx) = watch::channel(Answer::default());
    let pool = pool.clone();

    scope.spawn(async move {
        loop {
            let FileSearch { query, files: found } = files.borrow_and_update().clone();

            let result = match found {
                CatalogResult::Loading => None,
                CatalogResult::Error { message, cause } => {
                    Some(CatalogResult::Error { message, cause })
                }
                CatalogResult::Success(found) => {
                    let query = query.clone();
                    pool.run(move || {
                        weigh_all(found.iter().cloned(), &query)
                            .map(WeightedItem::into_display)
                            .collect::<Arc<[_]>>()
                    })
                    .await
                    .inspect_err(|report| error!("weighing files failed: {report}"))
                    .ok()
                    .map(CatalogResult::Success)
                }
            };

            if let Some(result) = result {
                tx.send_replace(Answer::new(query, result));
            }

            if files.changed().await.is_err() {
                break;
            }
        }
    });

    rx
}
