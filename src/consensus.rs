//! `ConsensusNode` — this crate's wrapper around `openraft::Raft`.
//!
//! Holds the `Arc<Raft<TypeConfig>>` handle and a background task that
//! watches `raft.metrics()` and translates state transitions into
//! `LeadershipEvent`s on a buffered channel — an unbuffered channel could
//! drop a `becameFollower` edge and leave the write gate incorrectly open.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{AddLearnerError, ClientWriteError, RaftError};
use openraft::storage::Adaptor;
use openraft::{BasicNode, ServerState};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::info;

use crate::fsm::{node_id_from_str, ApplyResult, Fsm, LeadershipEvent, NodeId, RaftInstance};
use crate::network::GrpcNetworkFactory;
use crate::store::Store;

/// Errors surfaced by `ConsensusNode` operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("propose timed out after {0:?}")]
    ProposeTimeout(Duration),
    #[error("this node is not the leader")]
    NotLeader,
    #[error("raft error: {0}")]
    Raft(String),
}

/// The three openraft config knobs controlling snapshot cadence. This crate
/// sets values favouring small logs in the reference configuration; callers
/// may override via [`crate::config::NodeConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SnapshotPolicy {
    pub snapshot_interval: Duration,
    pub snapshot_threshold: u64,
    pub trailing_logs: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(10),
            snapshot_threshold: 128,
            trailing_logs: 64,
        }
    }
}

/// A running Raft node: propose/addVoter/leadershipStream over the
/// underlying `openraft::Raft`, plus local read access to the `Store` it
/// owns via its `Fsm`.
#[derive(Clone)]
pub struct ConsensusNode {
    raft: Arc<RaftInstance>,
    store: Arc<Store>,
    pub node_id: NodeId,
}

impl ConsensusNode {
    /// Returns true if this node is the current Raft leader.
    pub fn is_leader(&self) -> bool {
        self.raft.metrics().borrow().current_leader == Some(self.node_id)
    }

    /// Local, consensus-free read — may be stale on a follower.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The underlying Raft handle, for wiring the transport server —
    /// `main` is the only caller outside this module.
    pub fn raft_handle(&self) -> Arc<RaftInstance> {
        self.raft.clone()
    }

    /// Submit a command for replication. Resolves once the entry is
    /// committed *and* applied locally, or fails on timeout, non-leader
    /// rejection, or internal error.
    pub async fn propose(
        &self,
        payload: Vec<u8>,
        propose_timeout: Duration,
    ) -> Result<ApplyResult, ConsensusError> {
        match timeout(propose_timeout, self.raft.client_write(payload)).await {
            Err(_) => Err(ConsensusError::ProposeTimeout(propose_timeout)),
            Ok(Err(RaftError::APIError(ClientWriteError::ForwardToLeader(_)))) => {
                Err(ConsensusError::NotLeader)
            }
            Ok(Err(e)) => Err(ConsensusError::Raft(e.to_string())),
            Ok(Ok(resp)) => Ok(resp.data),
        }
    }

    /// Add a new voting member. Must be invoked on the current leader;
    /// attempts against a follower fail. `prev_index` names the minimum
    /// committed index the caller expects the cluster to have reached before
    /// the join is accepted; this implementation accepts the parameter for
    /// interface parity but does not enforce it — `change_membership` already
    /// only succeeds once the new member has caught up via the normal Raft
    /// learner-catchup path, which makes an explicit minimum-index guard
    /// redundant here. `prev_index=0, timeout=0` (the default onboarding
    /// path) means "no minimum index, no bound" — callers pass
    /// `Duration::ZERO` for unbounded.
    pub async fn add_voter(
        &self,
        id: NodeId,
        address: String,
        _prev_index: u64,
        add_timeout: Duration,
    ) -> Result<(), ConsensusError> {
        let node = BasicNode { addr: address };

        let learner_fut = self.raft.add_learner(id, node, true);
        let learner_result = if add_timeout.is_zero() {
            learner_fut.await
        } else {
            timeout(add_timeout, learner_fut)
                .await
                .map_err(|_| ConsensusError::ProposeTimeout(add_timeout))?
        };
        learner_result.map_err(|e: RaftError<NodeId, AddLearnerError<NodeId, BasicNode>>| {
            ConsensusError::Raft(e.to_string())
        })?;

        let mut members: std::collections::BTreeSet<NodeId> = self
            .raft
            .metrics()
            .borrow()
            .membership_config
            .membership()
            .voter_ids()
            .collect();
        members.insert(id);

        self.raft
            .change_membership(members, false)
            .await
            .map_err(|e| match e {
                RaftError::APIError(ClientWriteError::ForwardToLeader(_)) => {
                    ConsensusError::NotLeader
                }
                other => ConsensusError::Raft(other.to_string()),
            })?;

        Ok(())
    }
}

/// Initialises and starts a Raft node. `bootstrap_peers` is empty for a
/// plain start and contains the full `(node_id, addr)` set — including this
/// node — for a bootstrap.
pub async fn start_consensus_node(
    self_addr: &str,
    bootstrap: bool,
    bootstrap_peers: Vec<(NodeId, String)>,
    policy: SnapshotPolicy,
    cluster_name: String,
    data_dir: PathBuf,
) -> (Arc<ConsensusNode>, mpsc::Receiver<LeadershipEvent>) {
    let this_node_id = node_id_from_str(self_addr);

    let raft_config = Arc::new(
        openraft::Config {
            cluster_name,
            heartbeat_interval: 500,
            election_timeout_min: 1_500,
            election_timeout_max: 3_000,
            snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(policy.snapshot_threshold),
            max_in_snapshot_log_to_keep: policy.trailing_logs,
            ..Default::default()
        }
        .validate()
        .expect("valid openraft config"),
    );

    let (fsm, store, _applied_rx) = Fsm::new(data_dir).await;
    let (log_store, state_machine) = Adaptor::new(fsm);

    let raft = Arc::new(
        openraft::Raft::new(
            this_node_id,
            raft_config,
            GrpcNetworkFactory,
            log_store,
            state_machine,
        )
        .await
        .expect("failed to create Raft instance"),
    );

    if bootstrap {
        let members: BTreeMap<NodeId, BasicNode> = bootstrap_peers
            .iter()
            .map(|(id, addr)| (*id, BasicNode { addr: addr.clone() }))
            .collect();
        raft.initialize(members)
            .await
            .expect("bootstrap initialise failed");
    }

    let node = Arc::new(ConsensusNode {
        raft: raft.clone(),
        store,
        node_id: this_node_id,
    });

    // Buffered leadership channel: capacity must be >= 1 so a
    // slow Supervisor never causes the Raft primitive to drop a transition.
    let (tx, rx) = mpsc::channel(16);
    {
        let mut metrics_rx = raft.metrics();
        tokio::spawn(async move {
            let mut was_leader = false;
            loop {
                if metrics_rx.changed().await.is_err() {
                    break;
                }
                let is_leader = matches!(metrics_rx.borrow().state, ServerState::Leader);
                if is_leader != was_leader {
                    was_leader = is_leader;
                    let event = if is_leader {
                        LeadershipEvent::BecameLeader
                    } else {
                        LeadershipEvent::BecameFollower
                    };
                    info!(node_id = this_node_id, ?event, "Leadership changed");
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });
    }

    (node, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_policy_defaults_favour_small_logs() {
        let p = SnapshotPolicy::default();
        assert!(p.snapshot_threshold > 0);
        assert!(p.trailing_logs > 0);
    }
}
