//! `HttpSurface` — the plain-text GET API.
//!
//! Built on `hyper`'s `make_service_fn`/`service_fn`/`Server::bind` idiom.
//! Four GET routes, `text/plain` bodies, HTTP status always 200 — errors
//! are signalled in the body text, not the status line, a deliberate
//! simplification over a status-code-driven API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use tracing::{error, info};

use crate::bootstrap::join_cluster;
use crate::command::Command;
use crate::consensus::ConsensusNode;
use crate::errors::CoreError;
use crate::fsm::node_id_from_str;
use crate::write_gate::WriteGate;

/// Shared, non-owning context handed to every request — resolves the
/// structural cycle between HttpSurface, the FSM (via the Store) and the
/// ConsensusNode: both need to reach the Store, and HttpSurface must also
/// reach the ConsensusNode, so a shared context of non-owning references is
/// the cleanest way to wire them without an ownership cycle.
#[derive(Clone)]
pub struct HttpContext {
    pub node: Arc<ConsensusNode>,
    pub gate: Arc<WriteGate>,
    pub propose_timeout: Duration,
}

fn query_params(req: &Request<Body>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

fn plain_text(body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .status(200)
        .header("Content-Type", "text/plain")
        .body(body.into())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

async fn handle_get(ctx: &HttpContext, params: HashMap<String, String>) -> Response<Body> {
    match params.get("key") {
        Some(key) if !key.is_empty() => {
            plain_text(ctx.node.store().get(key).unwrap_or_default())
        }
        _ => plain_text(CoreError::ParamError.body_text()),
    }
}

async fn handle_set(ctx: &HttpContext, params: HashMap<String, String>) -> Response<Body> {
    if !ctx.gate.writes_allowed() {
        return plain_text(CoreError::WriteNotAllowed.body_text());
    }

    let key = params.get("key").filter(|k| !k.is_empty());
    let value = params.get("value");

    let (key, value) = match (key, value) {
        (Some(key), Some(value)) => (key.clone(), value.clone()),
        _ => return plain_text(CoreError::ParamError.body_text()),
    };

    let payload = Command::set(key, value).encode();
    match ctx.node.propose(payload, ctx.propose_timeout).await {
        Ok(_) => plain_text("ok"),
        Err(e) => {
            let core: CoreError = e.into();
            error!(error = %core, "set failed");
            plain_text(core.body_text())
        }
    }
}

async fn handle_list(ctx: &HttpContext) -> Response<Body> {
    let mut body = String::new();
    for (k, v) in ctx.node.store().iter_sorted() {
        body.push_str(&k);
        body.push_str(" : ");
        body.push_str(&v);
        body.push('\n');
    }
    plain_text(body)
}

async fn handle_join(ctx: &HttpContext, params: HashMap<String, String>) -> Response<Body> {
    let peer_addr = match params.get("peerAddress").filter(|a| !a.is_empty()) {
        Some(addr) => addr.clone(),
        None => return plain_text(CoreError::ParamError.body_text()),
    };

    let id = node_id_from_str(&peer_addr);
    match ctx.node.add_voter(id, peer_addr, 0, Duration::ZERO).await {
        Ok(()) => plain_text("ok"),
        Err(e) => {
            let core: CoreError = e.into();
            error!(error = %core, "join failed");
            plain_text(core.body_text())
        }
    }
}

async fn route(req: Request<Body>, ctx: HttpContext) -> Result<Response<Body>, hyper::Error> {
    let params = query_params(&req);
    let response = match req.uri().path() {
        "/" => plain_text("ok"),
        "/get" => handle_get(&ctx, params).await,
        "/set" => handle_set(&ctx, params).await,
        "/list" => handle_list(&ctx).await,
        "/join" => handle_join(&ctx, params).await,
        _ => Response::builder()
            .status(404)
            .body(Body::from("not found"))
            .unwrap(),
    };
    Ok(response)
}

/// Starts the HTTP surface bound to `addr`. Runs indefinitely.
pub async fn start_http_surface(addr: SocketAddr, ctx: HttpContext) {
    let make_svc = make_service_fn(move |_conn| {
        let ctx = ctx.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let ctx = ctx.clone();
                async move { route(req, ctx).await }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(%addr, "HTTP surface started");
    if let Err(e) = server.await {
        error!(error = %e, "HTTP surface error");
    }
}

/// Requests that `peer_http_addr` add `own_raft_addr` as a voter. Thin
/// wrapper kept here so callers needn't import `crate::bootstrap` directly
/// from `main`.
pub async fn request_join(peer_http_addr: &str, own_raft_addr: &str) -> Result<(), crate::bootstrap::BootstrapError> {
    join_cluster(peer_http_addr, own_raft_addr).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{start_consensus_node, SnapshotPolicy};

    async fn test_context() -> HttpContext {
        let self_addr = "127.0.0.1:7000";
        let node_id = node_id_from_str(self_addr);
        // `into_path()`: the directory must outlive this function, so the
        // guard is released without deleting it; it's scratch space cleaned
        // up by the OS's temp directory, not by us.
        let data_dir = tempfile::tempdir().unwrap().into_path();
        let (node, _leadership_rx) = start_consensus_node(
            self_addr,
            true,
            vec![(node_id, self_addr.to_string())],
            SnapshotPolicy::default(),
            "test-cluster".into(),
            data_dir,
        )
        .await;

        // A freshly-bootstrapped single-node cluster elects itself leader
        // almost immediately; give it a moment before tests propose writes.
        for _ in 0..200 {
            if node.is_leader() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        HttpContext {
            node,
            gate: Arc::new(WriteGate::new()),
            propose_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn get_missing_key_returns_empty_body() {
        let ctx = test_context().await;
        let mut params = HashMap::new();
        params.insert("key".into(), "missing".into());
        let resp = handle_get(&ctx, params).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "");
    }

    #[tokio::test]
    async fn get_without_key_is_param_error() {
        let ctx = test_context().await;
        let resp = handle_get(&ctx, HashMap::new()).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "param error");
    }

    #[tokio::test]
    async fn set_rejected_when_gate_closed() {
        let ctx = test_context().await;
        let mut params = HashMap::new();
        params.insert("key".into(), "a".into());
        params.insert("value".into(), "1".into());
        let resp = handle_set(&ctx, params).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "write method not allowed");
    }

    #[tokio::test]
    async fn set_rejected_when_gate_closed_even_with_missing_params() {
        let ctx = test_context().await;
        let resp = handle_set(&ctx, HashMap::new()).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "write method not allowed");
    }

    #[tokio::test]
    async fn set_missing_value_is_param_error() {
        let ctx = test_context().await;
        ctx.gate.allow_writes();
        let mut params = HashMap::new();
        params.insert("key".into(), "a".into());
        let resp = handle_set(&ctx, params).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "param error");
    }

    #[tokio::test]
    async fn set_then_get_round_trips_when_leader() {
        let ctx = test_context().await;
        ctx.gate.allow_writes();
        let mut set_params = HashMap::new();
        set_params.insert("key".into(), "a".into());
        set_params.insert("value".into(), "1".into());
        let resp = handle_set(&ctx, set_params).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "ok");

        let mut get_params = HashMap::new();
        get_params.insert("key".into(), "a".into());
        let resp = handle_get(&ctx, get_params).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "1");
    }

    #[tokio::test]
    async fn list_renders_key_value_lines() {
        let ctx = test_context().await;
        ctx.gate.allow_writes();
        let mut params = HashMap::new();
        params.insert("key".into(), "a".into());
        params.insert("value".into(), "1".into());
        handle_set(&ctx, params).await;

        let resp = handle_list(&ctx).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "a : 1\n");
    }

    #[tokio::test]
    async fn join_without_peer_address_is_param_error() {
        let ctx = test_context().await;
        let resp = handle_join(&ctx, HashMap::new()).await;
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(bytes, "param error");
    }
}
