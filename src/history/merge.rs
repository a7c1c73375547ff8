use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::watch;

use crate::{
    history::{Entries, HistoryEntry},
    items::DisplayItem,
    tasks::TaskScope,
};

pub type MergedHistory = Option<Arc<[DisplayItem]>>;

/// Combines the per-kind histories into one list, most recent first.
#[derive(Debug)]
pub struct HistoryMerger;

impl HistoryMerger {
    /// Emits once every source has loaded, then again on every change.
    ///
    /// Entries used at the same instant keep the order of `sources`.
    #[must_use]
    pub fn merge(sources: Vec<watch::Receiver<Entries>>, scope: &TaskScope) -> watch::Receiver<MergedHistory> {
        let (tx, rx) = watch::channel(None);

        scope.spawn(async move {
            let mut latest: Vec<Entries> = vec![None; sources.len()];
            let mut open: Vec<(usize, watch::Receiver<Entries>)> =
                sources.into_iter().enumerate().collect();

            loop {
                for (source, rx) in &mut open {
                    latest[*source] = rx.borrow_and_update().clone();
                }

                if let Some(merged) = merged(&latest) {
                    tx.send_replace(Some(merged));
                }

                if open.is_empty() {
                    break;
                }

                let closed = {
                    let (changed, index, _) =
                        select_all(open.iter_mut().map(|(_, rx)| Box::pin(rx.changed()))).await;
                    changed.is_err().then_some(index)
                };
                if let Some(index) = closed {
                    open.remove(index);
                }
            }
        });

        rx
    }
}

/// `None` while any source is still loading.
fn merged(sources: &[Entries]) -> Option<Arc<[DisplayItem]>> {
    let mut entries: Vec<&HistoryEntry> = Vec::new();
    for source in sources {
        entries.extend(source.as_deref()?);
    }
    entries.sort_by(|a, b| b.updated_at_ms.cmp(&a.updated_at_ms));

    Some(entries.into_iter().map(|entry| entry.item.clone()).collect())
}
