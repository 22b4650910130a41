use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::fetcher::{FetchError, FetchTrace, RemoteListingFetcher};
use crate::item::{self, MediaItem, Reaction, Totals};
use crate::reactions::{ReactionStore, ReactionWriter};
use crate::retry::CancelToken;
use crate::sort::{self, SortMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Loading,
    Ok,
    Error,
    Skipped,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Loading => "loading",
            SyncStatus::Ok => "ok",
            SyncStatus::Error => "error",
            SyncStatus::Skipped => "skipped",
        }
    }
}

/// Outbound status for whatever UI surrounds the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub status: SyncStatus,
    pub count: usize,
    pub last_url: Option<String>,
    pub last_error: Option<String>,
}

impl SyncReport {
    pub fn summary(&self) -> String {
        match self.status {
            SyncStatus::Idle => "Waiting to unlock".to_string(),
            SyncStatus::Loading => "Loading from Drive…".to_string(),
            SyncStatus::Ok => format!("Loaded {} from Drive", self.count),
            SyncStatus::Error => {
                let mut line = "Drive load failed - check sharing or API key".to_string();
                if let Some(err) = &self.last_error {
                    line.push_str(": ");
                    line.push_str(err);
                }
                line
            }
            SyncStatus::Skipped => self
                .last_error
                .clone()
                .unwrap_or_else(|| "Using static links".to_string()),
        }
    }
}

/// Applies stored reactions to a freshly fetched set. Stored ids that are
/// no longer present are simply not carried over.
pub fn merge(items: Vec<MediaItem>, stored: &HashMap<String, Reaction>) -> Vec<MediaItem> {
    items
        .into_iter()
        .map(|mut item| {
            item.reaction = stored.get(&item.id).copied().unwrap_or_default();
            item
        })
        .collect()
}

struct InFlight {
    cancel: CancelToken,
    rx: Receiver<FetchOutcome>,
    stored: HashMap<String, Reaction>,
    fallback: Vec<MediaItem>,
}

struct FetchOutcome {
    result: Result<Vec<MediaItem>, FetchError>,
    last_url: Option<String>,
}

enum Phase {
    Empty,
    Fetching(InFlight),
    Populated,
}

/// The merged collection for the current session.
///
/// The catalog is either empty or complete; a fetch in flight publishes its
/// result in one step from [`MediaCatalog::poll`] or [`MediaCatalog::wait`].
pub struct MediaCatalog {
    fetcher: Option<Arc<RemoteListingFetcher>>,
    reactions: Arc<ReactionStore>,
    writer: ReactionWriter,
    items: Vec<MediaItem>,
    phase: Phase,
    report: SyncReport,
}

impl MediaCatalog {
    pub fn new(fetcher: Option<Arc<RemoteListingFetcher>>, reactions: Arc<ReactionStore>) -> Self {
        let writer = ReactionWriter::spawn(reactions.clone());
        Self {
            fetcher,
            reactions,
            writer,
            items: Vec::new(),
            phase: Phase::Empty,
            report: SyncReport::default(),
        }
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&MediaItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn report(&self) -> &SyncReport {
        &self.report
    }

    pub fn is_populated(&self) -> bool {
        matches!(self.phase, Phase::Populated)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Fetching(_))
    }

    /// Reacts to the external unlock gate: unlocking starts the one sync for
    /// this session, relocking tears down a sync that is still running.
    pub fn set_unlocked(&mut self, unlocked: bool, source: &SourceConfig) {
        if unlocked {
            self.initialize(source);
        } else {
            self.cancel();
        }
    }

    /// Starts the session's sync. A no-op while populated or already fetching.
    pub fn initialize(&mut self, source: &SourceConfig) {
        if !matches!(self.phase, Phase::Empty) {
            return;
        }
        let stored = self.reactions.load();

        let fetcher = match self.fetcher.clone() {
            Some(fetcher) if source.is_complete() => fetcher,
            available => {
                let hint = if source.credential.trim().is_empty() {
                    "Add an API key to the config or use static links"
                } else if source.folder.trim().is_empty() {
                    "Add a Drive folder to the config or use static links"
                } else if available.is_none() {
                    "Drive client unavailable; using static links"
                } else {
                    "Using static links"
                };
                info!("remote sync skipped: {hint}");
                self.report = SyncReport {
                    status: SyncStatus::Skipped,
                    count: 0,
                    last_url: None,
                    last_error: Some(hint.to_string()),
                };
                self.publish(merge(source.fallback_items.clone(), &stored));
                return;
            }
        };

        let cancel = CancelToken::new();
        let (tx, rx) = bounded(1);
        let folder = source.folder.clone();
        let credential = source.credential.clone();
        let token = cancel.clone();
        let spawned = thread::Builder::new()
            .name("drive-sync".into())
            .spawn(move || {
                let mut trace = FetchTrace::default();
                let result = fetcher
                    .fetch_all(&folder, &credential, &token, &mut trace)
                    .and_then(|descriptors| {
                        let items = admit(descriptors, &fetcher, &credential);
                        if items.is_empty() {
                            Err(FetchError::EmptyResult)
                        } else {
                            Ok(items)
                        }
                    });
                let _ = tx.send(FetchOutcome {
                    result,
                    last_url: trace.last_url,
                });
            });

        if let Err(err) = spawned {
            warn!(error = %err, "could not start sync thread");
            self.report = SyncReport {
                status: SyncStatus::Error,
                count: 0,
                last_url: None,
                last_error: Some(err.to_string()),
            };
            self.publish(merge(source.fallback_items.clone(), &stored));
            return;
        }

        self.report = SyncReport {
            status: SyncStatus::Loading,
            ..SyncReport::default()
        };
        self.phase = Phase::Fetching(InFlight {
            cancel,
            rx,
            stored,
            fallback: source.fallback_items.clone(),
        });
    }

    /// Aborts an in-flight sync. Whatever it later produces is discarded and
    /// the catalog returns to empty so a later unlock can try again. A page
    /// request already on the wire is not interrupted; it runs to its timeout
    /// and its result is dropped.
    pub fn cancel(&mut self) {
        if let Phase::Fetching(flight) = std::mem::replace(&mut self.phase, Phase::Empty) {
            flight.cancel.cancel();
            self.report = SyncReport::default();
            info!("sync cancelled");
        }
    }

    /// Applies a finished sync if there is one. Returns `true` when state changed.
    pub fn poll(&mut self) -> bool {
        let received = match &self.phase {
            Phase::Fetching(flight) => match flight.rx.try_recv() {
                Ok(outcome) => Some(outcome),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => None,
            },
            _ => return false,
        };
        self.complete(received);
        true
    }

    /// Blocks until the in-flight sync lands or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let received = match &self.phase {
            Phase::Fetching(flight) => match flight.rx.recv_timeout(timeout) {
                Ok(outcome) => Some(outcome),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => None,
            },
            _ => return false,
        };
        self.complete(received);
        true
    }

    fn complete(&mut self, received: Option<FetchOutcome>) {
        let Phase::Fetching(flight) = std::mem::replace(&mut self.phase, Phase::Empty) else {
            return;
        };
        let outcome = received.unwrap_or(FetchOutcome {
            result: Err(FetchError::Network {
                url: String::new(),
                message: "sync worker exited unexpectedly".into(),
                attempts: 0,
            }),
            last_url: None,
        });

        match outcome.result {
            Ok(items) => {
                info!(count = items.len(), "catalog populated from Drive");
                self.report = SyncReport {
                    status: SyncStatus::Ok,
                    count: items.len(),
                    last_url: outcome.last_url,
                    last_error: None,
                };
                self.publish(merge(items, &flight.stored));
            }
            Err(FetchError::Cancelled) => {
                self.report = SyncReport::default();
            }
            Err(err) => {
                warn!(error = %err, "Drive sync failed, using fallback items");
                let status = if err == FetchError::ConfigMissing {
                    SyncStatus::Skipped
                } else {
                    SyncStatus::Error
                };
                let last_url = match &err {
                    FetchError::Network { url, .. } if !url.is_empty() => Some(url.clone()),
                    _ => outcome.last_url,
                };
                let message = match &err {
                    FetchError::Network { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                self.report = SyncReport {
                    status,
                    count: 0,
                    last_url,
                    last_error: Some(message),
                };
                self.publish(merge(flight.fallback, &flight.stored));
            }
        }
    }

    fn publish(&mut self, items: Vec<MediaItem>) {
        self.items = items;
        self.phase = Phase::Populated;
    }

    /// Sets the reaction of the item with this id and persists the full set.
    /// Returns `false` when no such item exists.
    pub fn react(&mut self, id: &str, reaction: Reaction) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        item.reaction = reaction;
        self.writer.submit(&self.items);
        true
    }

    pub fn totals(&self) -> Totals {
        item::totals(&self.items)
    }

    pub fn sorted(&self, mode: SortMode) -> Vec<MediaItem> {
        sort::sort(&self.items, mode)
    }

    /// Waits for pending reaction writes.
    pub fn flush(&self) {
        self.writer.flush();
    }
}

impl Drop for MediaCatalog {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Converts descriptors to items, keeping the first occurrence of each id.
fn admit(
    descriptors: Vec<crate::drive::RawDescriptor>,
    fetcher: &RemoteListingFetcher,
    credential: &str,
) -> Vec<MediaItem> {
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter_map(|raw| match raw.into_item(fetcher.base_url(), credential) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(error = %err, "skipping unusable descriptor");
                None
            }
        })
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{ListingPage, ListingSource};
    use crate::fetcher::tests::{descriptor, fetcher, two_pages, ScriptedSource};
    use crate::storage::Store;
    use anyhow::Result;
    use crossbeam_channel::{unbounded, Sender};
    use std::sync::atomic::Ordering;
    use url::Url;

    const WAIT: Duration = Duration::from_secs(5);

    fn source_config(credential: &str) -> SourceConfig {
        SourceConfig {
            folder: "folder".into(),
            credential: credential.into(),
            fallback_items: vec![
                MediaItem::seed(0, "https://example.com/0.jpg"),
                MediaItem::seed(1, "https://example.com/1.jpg"),
            ],
        }
    }

    fn catalog_with(source: Arc<dyn ListingSource>, attempts: u32) -> (MediaCatalog, Arc<ReactionStore>) {
        let reactions = Arc::new(ReactionStore::new(Store::open_in_memory().unwrap()));
        let catalog = MediaCatalog::new(Some(Arc::new(fetcher(source, attempts))), reactions.clone());
        (catalog, reactions)
    }

    fn synced(catalog: &mut MediaCatalog, source: &SourceConfig) {
        catalog.initialize(source);
        assert!(catalog.wait(WAIT), "sync did not finish");
    }

    #[test]
    fn merge_with_empty_store_clears_reactions() {
        let mut liked = MediaItem::seed(0, "u");
        liked.reaction = Reaction::Like;
        let merged = merge(vec![liked, MediaItem::seed(1, "v")], &HashMap::new());
        assert!(merged.iter().all(|i| i.reaction == Reaction::None));
    }

    #[test]
    fn merge_round_trips_through_store() {
        let reactions = ReactionStore::new(Store::open_in_memory().unwrap());
        let mut items = vec![
            MediaItem::seed(0, "a"),
            MediaItem::seed(1, "b"),
            MediaItem::seed(2, "c"),
        ];
        items[0].reaction = Reaction::Like;
        items[2].reaction = Reaction::Dislike;
        reactions.save(&items);

        let fresh: Vec<_> = items
            .iter()
            .cloned()
            .map(|mut i| {
                i.reaction = Reaction::None;
                i
            })
            .collect();
        assert_eq!(merge(fresh, &reactions.load()), items);
    }

    #[test]
    fn two_page_scenario() {
        let source = Arc::new(ScriptedSource::new(two_pages(), 0));
        let (mut catalog, _) = catalog_with(source, 4);
        synced(&mut catalog, &source_config("key"));

        assert_eq!(catalog.report().status, SyncStatus::Ok);
        assert_eq!(catalog.report().count, 5);
        assert_eq!(catalog.totals(), Totals { likes: 0, dislikes: 0 });

        let third = catalog.items()[2].id.clone();
        assert!(catalog.react(&third, Reaction::Like));
        assert_eq!(catalog.totals(), Totals { likes: 1, dislikes: 0 });

        let names: Vec<_> = catalog
            .sorted(SortMode::NameAsc)
            .into_iter()
            .map(|i| i.name.unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec!["apple.jpg", "banana.jpg", "cherry.jpg", "date.png", "elder.mp4"]
        );
    }

    #[test]
    fn react_only_touches_matching_id() {
        let source = Arc::new(ScriptedSource::new(two_pages(), 0));
        let (mut catalog, _) = catalog_with(source, 4);
        synced(&mut catalog, &source_config("key"));
        let before = catalog.items().to_vec();
        assert!(catalog.react("b", Reaction::Dislike));
        assert!(!catalog.react("missing", Reaction::Like));
        for (old, new) in before.iter().zip(catalog.items()) {
            if new.id == "b" {
                assert_eq!(new.reaction, Reaction::Dislike);
            } else {
                assert_eq!(old, new);
            }
        }
    }

    #[test]
    fn reactions_survive_into_next_session_and_prune() {
        let store = Store::open_in_memory().unwrap();
        let reactions = Arc::new(ReactionStore::new(store));
        reactions.save(&[{
            let mut gone = MediaItem::seed(9, "gone");
            gone.id = "vanished".into();
            gone.reaction = Reaction::Like;
            gone
        }]);

        let source = Arc::new(ScriptedSource::new(two_pages(), 0));
        {
            let mut catalog = MediaCatalog::new(
                Some(Arc::new(fetcher(source.clone(), 4))),
                reactions.clone(),
            );
            synced(&mut catalog, &source_config("key"));
            assert!(catalog.get("vanished").is_none());
            catalog.react("d", Reaction::Like);
            catalog.flush();
        }

        let stored = reactions.load();
        assert_eq!(stored.get("d"), Some(&Reaction::Like));
        assert!(!stored.contains_key("vanished"));

        let mut next = MediaCatalog::new(Some(Arc::new(fetcher(source, 4))), reactions);
        synced(&mut next, &source_config("key"));
        assert_eq!(next.get("d").map(|i| i.reaction), Some(Reaction::Like));
    }

    #[test]
    fn missing_credential_skips_network() {
        let source = Arc::new(ScriptedSource::new(two_pages(), 0));
        let (mut catalog, reactions) = catalog_with(source.clone(), 4);
        let mut liked = MediaItem::seed(1, "https://example.com/1.jpg");
        liked.reaction = Reaction::Like;
        reactions.save(&[liked]);

        catalog.initialize(&source_config(""));
        assert!(catalog.is_populated());
        assert_eq!(catalog.report().status, SyncStatus::Skipped);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert_eq!(catalog.items().len(), 2);
        assert_eq!(catalog.get("seed-1").map(|i| i.reaction), Some(Reaction::Like));
        assert_eq!(catalog.get("seed-0").map(|i| i.reaction), Some(Reaction::None));
    }

    #[test]
    fn network_failure_falls_back_with_diagnostics() {
        let source = Arc::new(ScriptedSource::new(two_pages(), 10));
        let (mut catalog, _) = catalog_with(source, 2);
        synced(&mut catalog, &source_config("key"));
        let report = catalog.report();
        assert_eq!(report.status, SyncStatus::Error);
        assert!(report.last_url.as_deref().unwrap_or("").contains("/files"));
        assert!(report.last_error.as_deref().unwrap_or("").contains("503"));
        let ids: Vec<_> = catalog.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["seed-0", "seed-1"]);
    }

    #[test]
    fn empty_folder_is_reported_as_error() {
        let source = Arc::new(ScriptedSource::new(vec![("", ListingPage::default())], 0));
        let (mut catalog, _) = catalog_with(source, 4);
        synced(&mut catalog, &source_config("key"));
        assert_eq!(catalog.report().status, SyncStatus::Error);
        assert_eq!(
            catalog.report().last_error.as_deref(),
            Some("No files found. Is the folder public?")
        );
        assert_eq!(catalog.items().len(), 2);
    }

    #[test]
    fn unusable_descriptors_fall_back_like_an_empty_folder() {
        let page = ListingPage {
            files: vec![descriptor("", "x.jpg", "image/jpeg")],
            next_page_token: None,
        };
        let source = Arc::new(ScriptedSource::new(vec![("", page)], 0));
        let (mut catalog, _) = catalog_with(source, 4);
        synced(&mut catalog, &source_config("key"));
        let report = catalog.report();
        assert_eq!(report.status, SyncStatus::Error);
        assert_eq!(
            report.last_error.as_deref(),
            Some("No files found. Is the folder public?")
        );
        assert!(report.last_url.is_some());
        let ids: Vec<_> = catalog.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["seed-0", "seed-1"]);
    }

    #[test]
    fn initialize_runs_once_per_session() {
        let source = Arc::new(ScriptedSource::new(two_pages(), 0));
        let (mut catalog, _) = catalog_with(source.clone(), 4);
        synced(&mut catalog, &source_config("key"));
        catalog.initialize(&source_config("key"));
        catalog.set_unlocked(true, &source_config("key"));
        assert!(!catalog.is_loading());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let page = ListingPage {
            files: vec![
                descriptor("x", "first.jpg", "image/jpeg"),
                descriptor("x", "second.jpg", "image/jpeg"),
            ],
            next_page_token: None,
        };
        let source = Arc::new(ScriptedSource::new(vec![("", page)], 0));
        let (mut catalog, _) = catalog_with(source, 4);
        synced(&mut catalog, &source_config("key"));
        assert_eq!(catalog.items().len(), 1);
        assert_eq!(catalog.items()[0].name.as_deref(), Some("first.jpg"));
    }

    /// Blocks each request until the test releases it.
    struct GatedSource {
        gate: Receiver<()>,
        started: Sender<()>,
    }

    impl ListingSource for GatedSource {
        fn get_page(&self, _url: &Url) -> Result<ListingPage> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            Ok(ListingPage {
                files: vec![descriptor("late", "late.jpg", "image/jpeg")],
                next_page_token: None,
            })
        }
    }

    #[test]
    fn relock_mid_fetch_discards_late_result() {
        let (gate_tx, gate_rx) = unbounded();
        let (started_tx, started_rx) = unbounded();
        let source = Arc::new(GatedSource {
            gate: gate_rx,
            started: started_tx,
        });
        let (mut catalog, _) = catalog_with(source, 4);
        let cfg = source_config("key");

        catalog.set_unlocked(true, &cfg);
        assert!(catalog.is_loading());
        assert_eq!(catalog.report().status, SyncStatus::Loading);
        started_rx.recv_timeout(WAIT).unwrap();

        catalog.set_unlocked(false, &cfg);
        gate_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        assert!(!catalog.poll());
        assert!(catalog.items().is_empty());
        assert_eq!(catalog.report().status, SyncStatus::Idle);

        // a later unlock starts over
        catalog.set_unlocked(true, &cfg);
        started_rx.recv_timeout(WAIT).unwrap();
        gate_tx.send(()).unwrap();
        assert!(catalog.wait(WAIT));
        assert_eq!(catalog.get("late").map(|i| i.id.as_str()), Some("late"));
    }
}
