//! The state-machine integration and its Raft type configuration.
//!
//! `LogEntry` payloads are treated as an *opaque byte* blob, and `apply`
//! decodes each one as a [`crate::command::Command`] — this is why
//! `TypeConfig::D` is `Vec<u8>` rather than a typed enum. A typed `D` would
//! decode automatically inside openraft's own serialisation, leaving no seam
//! at which a malformed *committed* entry could be detected and treated as
//! fatal — so this module performs that decode explicitly, in
//! `apply_to_state_machine`, and panics on failure.
//!
//! Implements openraft's v1 `RaftStorage` trait (method names `append_to_log`,
//! `delete_conflict_logs_since`, `purge_logs_upto`, `apply_to_state_machine`),
//! wrapped by `Adaptor::new` to produce the v2 `(RaftLogStorage,
//! RaftStateMachine)` split `Raft::new` requires.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openraft::storage::{RaftLogReader, RaftSnapshotBuilder, RaftStorage};
use openraft::{
    BasicNode, Entry, LogId, LogState, RaftLogId, Snapshot, SnapshotMeta, StorageError,
    StoredMembership, TokioRuntime, Vote,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::command::Command;
use crate::store::Store;

/// Response returned by `apply` for one committed entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApplyResult {
    /// The value `key` held before this entry was applied, if any.
    pub prior: Option<String>,
}

openraft::declare_raft_types!(
    pub TypeConfig:
        D            = Vec<u8>,
        R            = ApplyResult,
        NodeId       = u64,
        Node         = BasicNode,
        Entry        = Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = TokioRuntime,
);

pub type NodeId = u64;
pub type RaftInstance = openraft::Raft<TypeConfig>;

/// Derive a stable u64 node ID from a human-readable address/identifier.
///
/// The Raft transport address doubles as the node's stable identity;
/// openraft needs a `u64`, so we hash it.
pub fn node_id_from_str(s: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}

/// A leadership transition emitted exactly on role change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    BecameLeader,
    BecameFollower,
}

/// On-disk representation of the log store plus the stable-store fields
/// that travel with it (the purge watermark and the committed index).
/// Written to `log.json` under `data_dir` on every log mutation.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedLog {
    entries: BTreeMap<u64, Entry<TypeConfig>>,
    last_purged: Option<LogId<NodeId>>,
    committed: Option<LogId<NodeId>>,
}

/// On-disk representation of the FSM's latest snapshot: the same bytes
/// `Store::marshal()` produces, plus the Raft metadata needed to resume
/// from it. Written to `snapshot.json` under `data_dir`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedSnapshot {
    meta: SnapshotMeta<NodeId, BasicNode>,
    data: Vec<u8>,
}

fn vote_path(dir: &Path) -> PathBuf {
    dir.join("vote.json")
}

fn log_path(dir: &Path) -> PathBuf {
    dir.join("log.json")
}

fn snapshot_path(dir: &Path) -> PathBuf {
    dir.join("snapshot.json")
}

/// Reads and deserialises `path`, returning `None` if it doesn't exist yet
/// (the common case on a node's first ever start).
async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => panic!("Failed reading {}: {e}. Fatal at startup.", path.display()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => panic!(
            "Failed restoring {}: {e}. Fatal at startup.",
            path.display()
        ),
    }
}

/// Serialises `value` and writes it to `path`. A write failure is logged,
/// not propagated: on the vote/log path this mirrors the stable store's
/// normal retry-on-next-mutation behaviour; on the snapshot path the Raft
/// primitive retries on its next snapshot interval regardless.
async fn write_json<T: Serialize>(path: &Path, value: &T) {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::write(path, bytes).await {
                error!(path = %path.display(), error = %e, "failed to persist raft state to disk");
            }
        }
        Err(e) => error!(path = %path.display(), error = %e, "failed to serialise raft state"),
    }
}

/// Combined in-memory Raft log + stable store + state machine.
///
/// The [`Store`] is the FSM's exclusive property: nothing else in this
/// struct, or anywhere else in the crate, mutates it.
pub struct Fsm {
    store: Arc<Store>,
    vote: Option<Vote<NodeId>>,
    log: BTreeMap<u64, Entry<TypeConfig>>,
    committed: Option<LogId<NodeId>>,
    last_purged: Option<LogId<NodeId>>,
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, BasicNode>,
    snapshot: Option<Snapshot<TypeConfig>>,
    /// Fires on every applied `Set` and on snapshot install — lets
    /// `ConsensusNode`/tests observe state-machine progress without polling.
    applied_tx: mpsc::UnboundedSender<()>,
    /// Directory holding `vote.json`, `log.json` and `snapshot.json` — the
    /// log database, the stable store and the snapshot directory, each
    /// reduced to a single file here rather than a dedicated embedded
    /// database, since a single node's log and snapshot are small enough to
    /// rewrite whole on every mutation.
    data_dir: PathBuf,
}

impl Fsm {
    /// Create a new FSM rooted at `data_dir`, restoring vote, log and
    /// snapshot state from it if a previous run left any behind. A node
    /// starting for the first time over an empty or missing directory gets
    /// a freshly-constructed `Store` instead.
    pub async fn new(data_dir: PathBuf) -> (Self, Arc<Store>, mpsc::UnboundedReceiver<()>) {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .unwrap_or_else(|e| {
                panic!(
                    "cannot create data directory {}: {e}",
                    data_dir.display()
                )
            });

        let store = Arc::new(Store::new());
        let (applied_tx, applied_rx) = mpsc::unbounded_channel();

        let vote: Option<Vote<NodeId>> = read_json(&vote_path(&data_dir)).await;
        let persisted_log: Option<PersistedLog> = read_json(&log_path(&data_dir)).await;
        let PersistedLog {
            entries: log,
            last_purged,
            committed,
        } = persisted_log.unwrap_or_default();

        let persisted_snapshot: Option<PersistedSnapshot> =
            read_json(&snapshot_path(&data_dir)).await;
        let (last_applied, last_membership, snapshot) = match persisted_snapshot {
            Some(p) => {
                store.unmarshal(&p.data).unwrap_or_else(|e| {
                    panic!("Failed restoring snapshot from disk: {e}. Fatal at startup.")
                });
                let last_log_id = p.meta.last_log_id;
                let last_membership = p.meta.last_membership.clone();
                info!(index = ?last_log_id, "restored store from on-disk snapshot");
                let snap = Snapshot {
                    meta: p.meta,
                    snapshot: Box::new(Cursor::new(p.data)),
                };
                (last_log_id, last_membership, Some(snap))
            }
            None => (None, StoredMembership::default(), None),
        };

        let fsm = Self {
            store: store.clone(),
            vote,
            log,
            committed,
            last_purged,
            last_applied,
            last_membership,
            snapshot,
            applied_tx,
            data_dir,
        };
        (fsm, store, applied_rx)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    async fn persist_log(&self) {
        let persisted = PersistedLog {
            entries: self.log.clone(),
            last_purged: self.last_purged,
            committed: self.committed,
        };
        write_json(&log_path(&self.data_dir), &persisted).await;
    }
}

/// Log reader backed by a point-in-time clone of the log.
pub struct FsmLogReader {
    log: BTreeMap<u64, Entry<TypeConfig>>,
}

impl RaftLogReader<TypeConfig> for Fsm {
    async fn try_get_log_entries<RB>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>>
    where
        RB: RangeBounds<u64> + Clone + std::fmt::Debug + Send,
    {
        Ok(self.log.range(range).map(|(_, e)| e.clone()).collect())
    }
}

impl RaftLogReader<TypeConfig> for FsmLogReader {
    async fn try_get_log_entries<RB>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>>
    where
        RB: RangeBounds<u64> + Clone + std::fmt::Debug + Send,
    {
        Ok(self.log.range(range).map(|(_, e)| e.clone()).collect())
    }
}

/// Produced by the FSM; captures a consistent view of the `Store` at the
/// moment of creation, decoupling the snapshot byte-image from any
/// mutations applied after it was taken.
pub struct FsmSnapshotBuilder {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, BasicNode>,
    store: Arc<Store>,
    data_dir: PathBuf,
}

impl RaftSnapshotBuilder<TypeConfig> for FsmSnapshotBuilder {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        // Store::marshal() is captured here, not lazily — later mutations to
        // the live Store must not leak into this snapshot's byte image.
        let data = self.store.marshal();

        let snap_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .to_string();

        let meta = SnapshotMeta {
            last_log_id: self.last_applied,
            last_membership: self.last_membership.clone(),
            snapshot_id: snap_id,
        };

        let persisted = PersistedSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };
        write_json(&snapshot_path(&self.data_dir), &persisted).await;

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

impl RaftStorage<TypeConfig> for Fsm {
    type LogReader = FsmLogReader;
    type SnapshotBuilder = FsmSnapshotBuilder;

    // ── Vote ──────────────────────────────────────────────────────────────

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.vote = Some(*vote);
        write_json(&vote_path(&self.data_dir), &self.vote).await;
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.vote)
    }

    // ── Log ───────────────────────────────────────────────────────────────

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last = self.log.values().next_back().map(|e| *e.get_log_id());
        Ok(LogState {
            last_purged_log_id: self.last_purged,
            last_log_id: last,
        })
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        self.committed = committed;
        self.persist_log().await;
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        Ok(self.committed)
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        FsmLogReader {
            log: self.log.clone(),
        }
    }

    async fn append_to_log<I>(&mut self, entries: I) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
    {
        for entry in entries {
            self.log.insert(entry.get_log_id().index, entry);
        }
        self.persist_log().await;
        Ok(())
    }

    async fn delete_conflict_logs_since(
        &mut self,
        log_id: LogId<NodeId>,
    ) -> Result<(), StorageError<NodeId>> {
        self.log.retain(|&idx, _| idx < log_id.index);
        self.persist_log().await;
        Ok(())
    }

    async fn purge_logs_upto(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.log.retain(|&idx, _| idx > log_id.index);
        self.last_purged = Some(log_id);
        self.persist_log().await;
        Ok(())
    }

    // ── State machine ───────────────────────────────────────────────────

    async fn last_applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, BasicNode>), StorageError<NodeId>>
    {
        Ok((self.last_applied, self.last_membership.clone()))
    }

    /// Apply committed entries, strictly in index order, exactly once each
    /// (openraft's contract).
    ///
    /// A `Normal` entry's payload is an opaque `Vec<u8>`. Decoding it as a
    /// [`Command`] failing here means the committed log itself is corrupt or
    /// this is a bug — this is unrecoverable, and the node terminates rather
    /// than silently diverging from its peers.
    async fn apply_to_state_machine(
        &mut self,
        entries: &[Entry<TypeConfig>],
    ) -> Result<Vec<ApplyResult>, StorageError<NodeId>> {
        let mut responses = Vec::with_capacity(entries.len());

        for entry in entries {
            self.last_applied = Some(*entry.get_log_id());

            match &entry.payload {
                openraft::EntryPayload::Blank => {
                    responses.push(ApplyResult { prior: None });
                }
                openraft::EntryPayload::Normal(bytes) => {
                    let Command::Set { key, value } = Command::decode(bytes)
                        .unwrap_or_else(|e| {
                            panic!(
                                "Failed decoding committed Raft log entry at index {}: {e}. \
                                 This is a bug or log corruption — terminating to avoid state divergence.",
                                entry.get_log_id().index
                            )
                        });
                    let prior = self.store.set(key, value);
                    let _ = self.applied_tx.send(());
                    responses.push(ApplyResult { prior });
                }
                openraft::EntryPayload::Membership(m) => {
                    self.last_membership =
                        StoredMembership::new(Some(*entry.get_log_id()), m.clone());
                    responses.push(ApplyResult { prior: None });
                }
            }
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        FsmSnapshotBuilder {
            last_applied: self.last_applied,
            last_membership: self.last_membership.clone(),
            store: self.store.clone(),
            data_dir: self.data_dir.clone(),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    /// Invoked at most once per node lifetime, before any `apply` call
    /// Any error is fatal to startup.
    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        self.store
            .unmarshal(snapshot.get_ref())
            .unwrap_or_else(|e| panic!("Failed restoring snapshot: {e}. Fatal at startup."));

        let data = snapshot.into_inner();
        let persisted = PersistedSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        };
        write_json(&snapshot_path(&self.data_dir), &persisted).await;

        self.last_applied = meta.last_log_id;
        self.last_membership = meta.last_membership.clone();
        self.snapshot = Some(Snapshot {
            meta: meta.clone(),
            snapshot: Box::new(Cursor::new(data)),
        });
        let _ = self.applied_tx.send(());
        info!(index = ?meta.last_log_id, "Restored store from snapshot");
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        Ok(self.snapshot.clone())
    }
}
