//! Composition root: parses configuration, decides this node's bootstrap
//! path, starts the Raft transport, HTTP surface and leadership supervisor,
//! then waits forever.
//!
//! Wiring order: load config, build the FSM/Raft node, start the gRPC
//! transport, start the HTTP surface, then either bootstrap, join, or
//! plain-start, finally parking on the leadership-notification loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use raftkv::bootstrap::BootstrapPlan;
use raftkv::config::NodeConfig;
use raftkv::consensus::{start_consensus_node, SnapshotPolicy};
use raftkv::fsm::node_id_from_str;
use raftkv::http::{start_http_surface, HttpContext};
use raftkv::network::start_transport_server;
use raftkv::write_gate::WriteGate;
use raftkv::{bootstrap, supervisor};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    let config = match NodeConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        raft_addr = %config.raft_addr,
        http_addr = %config.http_addr,
        bootstrap = config.bootstrap,
        join_addr = ?config.join_addr,
        "starting raftkv node"
    );

    let plan = BootstrapPlan::from_config(config.bootstrap, config.join_addr.clone());

    let bootstrap_peers = match &plan {
        BootstrapPlan::Bootstrap => {
            vec![(node_id_from_str(&config.raft_addr), config.raft_addr.clone())]
        }
        BootstrapPlan::Join { .. } | BootstrapPlan::PlainStart => Vec::new(),
    };

    let policy = SnapshotPolicy {
        snapshot_interval: config.snapshot_interval,
        snapshot_threshold: config.snapshot_threshold,
        trailing_logs: config.trailing_logs,
    };

    let (node, leadership_rx) = start_consensus_node(
        &config.raft_addr,
        matches!(plan, BootstrapPlan::Bootstrap),
        bootstrap_peers,
        policy,
        "raftkv".to_string(),
        std::path::PathBuf::from(&config.data_dir),
    )
    .await;

    let raft_addr: SocketAddr = config
        .raft_addr
        .parse()
        .unwrap_or_else(|e| panic!("invalid RAFT_ADDR {:?}: {e}", config.raft_addr));
    {
        let raft = node.raft_handle();
        tokio::spawn(async move {
            start_transport_server(raft_addr, raft).await;
        });
    }

    let gate = Arc::new(WriteGate::new());
    tokio::spawn(supervisor::run(gate.clone(), leadership_rx));

    let http_addr: SocketAddr = config
        .http_addr
        .parse()
        .unwrap_or_else(|e| panic!("invalid HTTP_ADDR {:?}: {e}", config.http_addr));
    let ctx = HttpContext {
        node: node.clone(),
        gate,
        propose_timeout: config.propose_timeout,
    };
    tokio::spawn(start_http_surface(http_addr, ctx));

    if let BootstrapPlan::Join { peer_addr } = &plan {
        if let Err(e) = bootstrap::join_cluster(peer_addr, &config.raft_addr).await {
            error!(error = %e, peer = %peer_addr, "failed to join cluster");
            // Not retried: a failed join is treated as a configuration
            // error for an operator to fix, not a transient fault.
            std::process::exit(1);
        }
        info!(peer = %peer_addr, "joined cluster");
    }

    // Park forever; the spawned tasks above carry the node's actual work.
    std::future::pending::<()>().await;
}
