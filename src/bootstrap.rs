//! `Bootstrapper` — decides how a node enters a cluster at process start.
//!
//! A `GET http://<peer>/join?peerAddress=<addr>` request to an existing
//! member, treating any body other than `"ok"` as fatal, is the join
//! protocol. There are exactly three mutually exclusive paths, matching
//! [`crate::config::NodeConfig`]'s validation that `bootstrap` and
//! `join_addr` cannot both be set:
//!
//! 1. **Bootstrap** — this node initialises a brand-new single-member
//!    cluster.
//! 2. **Join** — this node asks an existing member to add it as a voter.
//! 3. **Plain start** — this node starts Raft with no initial membership and
//!    waits to be added by an operator (or to discover state from its own
//!    `data_dir` on restart).
//!
//! A failed join is not retried: misconfiguration (a dead or wrong peer
//! address) is treated as an operator error to fix and restart, not a
//! transient fault to paper over.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to reach join target {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("join target {addr} rejected the request: {body}")]
    Rejected { addr: String, body: String },
}

/// The path this node takes to enter (or start) a cluster, decided once at
/// startup from [`crate::config::NodeConfig`].
#[derive(Debug, Clone)]
pub enum BootstrapPlan {
    /// Initialise a new single-member cluster rooted at this node.
    Bootstrap,
    /// Ask `peer_addr` (an HTTP address) to add this node as a voter.
    Join { peer_addr: String },
    /// Start with no membership; an operator will add this node later.
    PlainStart,
}

impl BootstrapPlan {
    /// Derives the plan from configuration. Mirrors
    /// [`crate::config::NodeConfig::from_env`]'s invariant that bootstrap and
    /// join are mutually exclusive.
    pub fn from_config(bootstrap: bool, join_addr: Option<String>) -> Self {
        if bootstrap {
            BootstrapPlan::Bootstrap
        } else if let Some(peer_addr) = join_addr {
            BootstrapPlan::Join { peer_addr }
        } else {
            BootstrapPlan::PlainStart
        }
    }
}

/// Asks `peer_http_addr` to add `own_raft_addr` as a voter, via the HTTP
/// `/join` surface. Contract: a 200 response whose body is literally `ok`
/// is success; anything else — unreachable peer, non-"ok" body — is a fatal
/// join failure the caller should abort the process on.
pub async fn join_cluster(peer_http_addr: &str, own_raft_addr: &str) -> Result<(), BootstrapError> {
    let url = format!("http://{peer_http_addr}/join?peerAddress={own_raft_addr}");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| BootstrapError::Unreachable {
            addr: peer_http_addr.to_string(),
            source: e,
        })?;

    let response =
        client
            .get(&url)
            .send()
            .await
            .map_err(|e| BootstrapError::Unreachable {
                addr: peer_http_addr.to_string(),
                source: e,
            })?;

    let body = response
        .text()
        .await
        .map_err(|e| BootstrapError::Unreachable {
            addr: peer_http_addr.to_string(),
            source: e,
        })?;

    if body.trim() != "ok" {
        return Err(BootstrapError::Rejected {
            addr: peer_http_addr.to_string(),
            body,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn bootstrap_flag_wins_plan_selection() {
        let plan = BootstrapPlan::from_config(true, None);
        assert!(matches!(plan, BootstrapPlan::Bootstrap));
    }

    #[test]
    fn join_addr_selects_join_plan() {
        let plan = BootstrapPlan::from_config(false, Some("127.0.0.1:6001".into()));
        assert!(matches!(plan, BootstrapPlan::Join { peer_addr } if peer_addr == "127.0.0.1:6001"));
    }

    #[test]
    fn neither_selects_plain_start() {
        let plan = BootstrapPlan::from_config(false, None);
        assert!(matches!(plan, BootstrapPlan::PlainStart));
    }

    #[tokio::test]
    async fn join_succeeds_on_ok_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/join"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let addr = server.address().to_string();
        let result = join_cluster(&addr, "127.0.0.1:7001").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn join_fails_on_non_ok_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/join"))
            .respond_with(ResponseTemplate::new(200).set_body_string("param error"))
            .mount(&server)
            .await;

        let addr = server.address().to_string();
        let result = join_cluster(&addr, "127.0.0.1:7001").await;
        assert!(matches!(result, Err(BootstrapError::Rejected { .. })));
    }

    #[tokio::test]
    async fn join_fails_when_peer_unreachable() {
        // Port 0 never accepts connections; stands in for a down peer.
        let result = join_cluster("127.0.0.1:0", "127.0.0.1:7001").await;
        assert!(matches!(result, Err(BootstrapError::Unreachable { .. })));
    }
}
