//! Fan-in of every source into one ranked list.

use std::sync::Arc;

use rayon::slice::ParallelSliceMut;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error};

use crate::{
    catalog::{
        CatalogResult,
        feed::{Answer, Results},
    },
    history::merge::MergedHistory,
    items::{DisplayItem, ItemKind, WeightedItem},
    search::Tokens,
    tasks::{ComputePool, TaskScope},
};

/// What the consumer renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    /// Matches for the current query, heaviest first.
    pub items: Arc<[WeightedItem]>,
    /// Recently used items, most recent first. `None` in the placeholder.
    pub history: Option<Arc<[DisplayItem]>>,
}

impl UiState {
    /// Whether this is the state shown before every source reported.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.history.is_none()
    }
}

/// A transient notice for the user, e.g. a source that failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub kind: ItemKind,
}

/// At most one undelivered message per subscriber. A new message replaces
/// the pending one instead of blocking the producer.
#[derive(Debug, Clone)]
pub struct MessageBus(broadcast::Sender<Message>);

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self(broadcast::channel(1).0)
    }

    pub fn publish(&self, text: impl Into<String>, kind: ItemKind) {
        let message = Message {
            text: text.into(),
            kind,
        };
        if self.0.send(message).is_err() {
            debug!("no one is listening for messages");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.0.subscribe()
    }
}

/// Sources in fan-in order.
const SOURCES: [ItemKind; 3] = [ItemKind::Setting, ItemKind::App, ItemKind::File];

/// Everything the aggregate is computed from.
#[derive(Debug)]
pub struct Inputs {
    pub settings: watch::Receiver<Answer>,
    pub apps: watch::Receiver<Answer>,
    pub files: watch::Receiver<Answer>,
    /// The query last issued to every source.
    pub query: watch::Receiver<Tokens>,
    pub history: watch::Receiver<MergedHistory>,
}

#[derive(Debug)]
pub struct Aggregator {
    state: watch::Receiver<UiState>,
}

impl Aggregator {
    /// Starts combining the latest value of every source.
    ///
    /// The state stays the placeholder until all three result streams and
    /// the history produced a value. Each error a source reports is
    /// published on `bus` once.
    ///
    /// Results computed for an older query never reach the state. Settings
    /// and apps are filtered in memory, so the state waits for them to
    /// catch up; files are left out until their search for the current
    /// query completes.
    pub fn new(scope: &TaskScope, pool: &ComputePool, bus: MessageBus, inputs: Inputs) -> Self {
        let (tx, state) = watch::channel(UiState::default());
        let pool = pool.clone();
        let Inputs {
            settings,
            apps,
            files,
            mut query,
            mut history,
        } = inputs;
        let mut sources = [settings, apps, files];

        scope.spawn(async move {
            let mut fired = [true; 3];
            loop {
                let answers: [Answer; 3] = std::array::from_fn(|i| {
                    let rx = &mut sources[i];
                    // `changed()` marks the value seen, so a source that fired
                    // in `select!` no longer reports `has_changed()`.
                    let changed = fired[i] || rx.has_changed().unwrap_or(false);
                    let answer = rx.borrow_and_update().clone();

                    if changed && let CatalogResult::Error { message, .. } = &answer.results {
                        bus.publish(message.clone(), SOURCES[i]);
                    }
                    answer
                });
                let tokens = query.borrow_and_update().clone();
                let merged = history.borrow_and_update().clone();

                if let Some(history) = merged
                    && let Some(results) = current(answers, &tokens)
                {
                    match pool.run(move || rank(&results)).await {
                        Ok(items) => {
                            tx.send_replace(UiState {
                                items,
                                history: Some(history),
                            });
                        }
                        Err(report) => error!("ranking failed: {report}"),
                    }
                }

                fired = [false; 3];
                let [settings, apps, files] = &mut sources;
                tokio::select! {
                    Ok(()) = settings.changed() => fired[0] = true,
                    Ok(()) = apps.changed() => fired[1] = true,
                    Ok(()) = files.changed() => fired[2] = true,
                    Ok(()) = query.changed() => {}
                    Ok(()) = history.changed() => {}
                    else => break,
                }
            }
        });

        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<UiState> {
        self.state.clone()
    }
}

/// The results to show for `query`, `None` while a source still owes its
/// answer.
fn current(answers: [Answer; 3], query: &Tokens) -> Option<[Results; 3]> {
    let [settings, apps, files] = answers;
    if !settings.answers(query) || !apps.answers(query) || files.results.is_loading() {
        return None;
    }

    let files = if files.answers(query) {
        files.results
    } else {
        debug!("leaving out file results of a superseded query");
        CatalogResult::Success(Arc::from([]))
    };

    Some([settings.results, apps.results, files])
}

/// Concatenates the sources in fan-in order, then sorts heaviest first.
/// The sort is stable, so ties keep the fan-in order. A failed source
/// contributes nothing.
fn rank(results: &[Results]) -> Arc<[WeightedItem]> {
    let mut items: Vec<WeightedItem> = results
        .iter()
        .filter_map(CatalogResult::success)
        .flat_map(|items| items.iter().cloned())
        .collect();
    items.par_sort_by(|a, b| b.weight.cmp(&a.weight));

    items.into()
}
