//! `Supervisor` — owns the leadership-notification loop.
//!
//! Consumes `LeadershipEvent`s off the channel `ConsensusNode` feeds and
//! toggles the `WriteGate` accordingly. No other work runs on this loop;
//! it is the sole writer of the `WriteGate`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::fsm::LeadershipEvent;
use crate::write_gate::WriteGate;

/// Consumes a `LeadershipEvent` stream and toggles `gate` accordingly.
/// Runs until the channel closes (process shutdown).
pub async fn run(gate: Arc<WriteGate>, mut leadership: mpsc::Receiver<LeadershipEvent>) {
    while let Some(event) = leadership.recv().await {
        match event {
            LeadershipEvent::BecameLeader => {
                info!("become leader, enable write api");
                gate.allow_writes();
            }
            LeadershipEvent::BecameFollower => {
                info!("become follower, close write api");
                gate.deny_writes();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leader_event_opens_gate() {
        let gate = Arc::new(WriteGate::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(LeadershipEvent::BecameLeader).await.unwrap();
        drop(tx);

        run(gate.clone(), rx).await;
        assert!(gate.writes_allowed());
    }

    #[tokio::test]
    async fn follower_event_closes_gate() {
        let gate = Arc::new(WriteGate::new());
        gate.allow_writes();
        let (tx, rx) = mpsc::channel(4);
        tx.send(LeadershipEvent::BecameFollower).await.unwrap();
        drop(tx);

        run(gate.clone(), rx).await;
        assert!(!gate.writes_allowed());
    }

    #[tokio::test]
    async fn processes_events_in_order() {
        let gate = Arc::new(WriteGate::new());
        let (tx, rx) = mpsc::channel(4);
        tx.send(LeadershipEvent::BecameLeader).await.unwrap();
        tx.send(LeadershipEvent::BecameFollower).await.unwrap();
        tx.send(LeadershipEvent::BecameLeader).await.unwrap();
        drop(tx);

        run(gate.clone(), rx).await;
        assert!(gate.writes_allowed());
    }
}
