use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::item::{MediaItem, Reaction};
use crate::storage::Store;

/// Bumped whenever the persisted shape changes; older keys are ignored.
pub const STATE_KEY: &str = "media_reactions_v2";
const RECORD_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub id: String,
    #[serde(default)]
    pub reaction: Reaction,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedReactions {
    version: u32,
    #[serde(default)]
    reactions: Vec<ReactionRecord>,
}

/// Best-effort persistence of the id → reaction mapping.
#[derive(Debug, Clone)]
pub struct ReactionStore {
    store: Store,
}

impl ReactionStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Never fails: unreadable, corrupt or foreign-version data reads as empty.
    pub fn load(&self) -> HashMap<String, Reaction> {
        match self.try_load() {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "reactions: load failed, starting empty");
                HashMap::new()
            }
        }
    }

    fn try_load(&self) -> Result<HashMap<String, Reaction>> {
        let Some(raw) = self.store.get_state(STATE_KEY)? else {
            return Ok(HashMap::new());
        };
        let record: PersistedReactions =
            serde_json::from_str(&raw).context("reactions: decode persisted record")?;
        if record.version != RECORD_VERSION {
            debug!(
                found = record.version,
                expected = RECORD_VERSION,
                "reactions: version mismatch, ignoring stored record"
            );
            return Ok(HashMap::new());
        }
        Ok(record
            .reactions
            .into_iter()
            .map(|r| (r.id, r.reaction))
            .collect())
    }

    /// Replaces the persisted record with exactly these items. Errors are logged.
    pub fn save(&self, items: &[MediaItem]) {
        self.save_records(&records_for(items));
    }

    fn save_records(&self, records: &[ReactionRecord]) {
        if let Err(err) = self.try_save(records) {
            warn!(error = %format!("{err:#}"), "reactions: save failed");
        }
    }

    fn try_save(&self, records: &[ReactionRecord]) -> Result<()> {
        let payload = serde_json::to_string(&PersistedReactions {
            version: RECORD_VERSION,
            reactions: records.to_vec(),
        })
        .context("reactions: encode record")?;
        self.store.put_state(STATE_KEY, &payload)
    }
}

pub fn records_for(items: &[MediaItem]) -> Vec<ReactionRecord> {
    items
        .iter()
        .map(|item| ReactionRecord {
            id: item.id.clone(),
            reaction: item.reaction,
        })
        .collect()
}

enum WriteCommand {
    Save(Vec<ReactionRecord>),
    Flush(Sender<()>),
}

/// Fire-and-forget saves on a background thread. Queued snapshots collapse
/// to the newest one, so the last write wins.
pub struct ReactionWriter {
    tx: Option<Sender<WriteCommand>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReactionWriter {
    pub fn spawn(store: Arc<ReactionStore>) -> Self {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("reaction-writer".into())
            .spawn(move || write_loop(&store, rx))
            .map_err(|err| warn!(error = %err, "reactions: writer thread unavailable"))
            .ok();
        Self {
            tx: handle.as_ref().map(|_| tx),
            handle,
        }
    }

    pub fn submit(&self, items: &[MediaItem]) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(WriteCommand::Save(records_for(items)));
        }
    }

    /// Blocks until every snapshot submitted so far has been written.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(WriteCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for ReactionWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_loop(store: &ReactionStore, rx: Receiver<WriteCommand>) {
    while let Ok(first) = rx.recv() {
        let mut latest = None;
        let mut acks = Vec::new();
        let mut next = Some(first);
        while let Some(cmd) = next {
            match cmd {
                WriteCommand::Save(records) => latest = Some(records),
                WriteCommand::Flush(ack) => acks.push(ack),
            }
            next = rx.try_recv().ok();
        }
        if let Some(records) = latest {
            store.save_records(&records);
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, reaction: Reaction) -> MediaItem {
        let mut item = MediaItem::seed(0, "https://example.com/x.jpg");
        item.id = id.into();
        item.reaction = reaction;
        item
    }

    #[test]
    fn empty_store_loads_empty() {
        let reactions = ReactionStore::new(Store::open_in_memory().unwrap());
        assert!(reactions.load().is_empty());
    }

    #[test]
    fn save_replaces_previous_content() {
        let reactions = ReactionStore::new(Store::open_in_memory().unwrap());
        reactions.save(&[item("a", Reaction::Like), item("b", Reaction::Dislike)]);
        reactions.save(&[item("b", Reaction::None)]);
        let loaded = reactions.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("b"), Some(&Reaction::None));
        assert!(!loaded.contains_key("a"));
    }

    #[test]
    fn corrupt_record_reads_as_empty() {
        let store = Store::open_in_memory().unwrap();
        store.put_state(STATE_KEY, "{not json").unwrap();
        assert!(ReactionStore::new(store).load().is_empty());
    }

    #[test]
    fn unversioned_or_foreign_version_reads_as_empty() {
        let store = Store::open_in_memory().unwrap();
        store
            .put_state(STATE_KEY, r#"[{"id":"a","reaction":"like"}]"#)
            .unwrap();
        let reactions = ReactionStore::new(store.clone());
        assert!(reactions.load().is_empty());

        store
            .put_state(
                STATE_KEY,
                r#"{"version":3,"reactions":[{"id":"a","reaction":"like"}]}"#,
            )
            .unwrap();
        assert!(reactions.load().is_empty());
    }

    #[test]
    fn writer_applies_last_snapshot() {
        let reactions = Arc::new(ReactionStore::new(Store::open_in_memory().unwrap()));
        let writer = ReactionWriter::spawn(reactions.clone());
        writer.submit(&[item("a", Reaction::Like)]);
        writer.submit(&[item("a", Reaction::Dislike)]);
        writer.flush();
        assert_eq!(reactions.load().get("a"), Some(&Reaction::Dislike));
    }
}
