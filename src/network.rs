//! gRPC transport for Raft RPCs between cluster nodes.
//!
//! `openraft` does not ship a transport of its own, so this module supplies
//! one: a small `tonic` service carrying JSON-encoded openraft payloads in a
//! `bytes` field of each RPC message (see `proto/raftkv.proto`).

use std::sync::Arc;
use std::time::Duration;

use openraft::error::{InstallSnapshotError, RPCError, RaftError, Unreachable};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use openraft::{AnyError, BasicNode};
use tonic::transport::{Channel, Endpoint, Server};
use tonic::{Request, Response, Status};

use crate::fsm::{NodeId, RaftInstance, TypeConfig};

pub mod proto {
    tonic::include_proto!("raftkv");
}

use proto::raft_transport_client::RaftTransportClient;
use proto::raft_transport_server::{RaftTransport, RaftTransportServer};
use proto::{
    AppendEntriesRequest as ProtoAER, AppendEntriesResponse as ProtoAEResp,
    SnapshotRequest as ProtoSR, SnapshotResponse as ProtoSResp, VoteRequest as ProtoVR,
    VoteResponse as ProtoVResp,
};

fn unreachable(msg: impl std::fmt::Display) -> Unreachable {
    Unreachable::new(&AnyError::error(msg.to_string()))
}

// ── Client side: openraft's RaftNetwork, dialing peers over gRPC ───────────

/// Per-peer gRPC channel implementing openraft's `RaftNetwork`.
pub struct GrpcNetwork {
    target_addr: String,
    client: Option<RaftTransportClient<Channel>>,
}

impl GrpcNetwork {
    fn get_client(&mut self) -> Result<&mut RaftTransportClient<Channel>, String> {
        if self.client.is_none() {
            let uri = if self.target_addr.starts_with("http") {
                self.target_addr.clone()
            } else {
                format!("http://{}", self.target_addr)
            };
            // connect_lazy() dials on the first RPC and reconnects
            // automatically on failure; timeout keeps a dead peer's
            // heartbeats from hanging until its own election timer fires.
            let ch = Endpoint::from_shared(uri)
                .map_err(|e| e.to_string())?
                .connect_timeout(Duration::from_secs(3))
                .timeout(Duration::from_secs(4))
                .connect_lazy();
            self.client = Some(RaftTransportClient::new(ch));
        }
        Ok(self.client.as_mut().unwrap())
    }
}

impl RaftNetwork<TypeConfig> for GrpcNetwork {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let payload =
            serde_json::to_vec(&rpc).map_err(|e| RPCError::Unreachable(unreachable(e)))?;
        let term = rpc.vote.leader_id().term;
        let leader = rpc.vote.leader_id().node_id.to_string();

        let client = self
            .get_client()
            .map_err(|e| RPCError::Unreachable(unreachable(e)))?;

        let proto_resp = client
            .append_entries(ProtoAER {
                term,
                leader_id: leader,
                payload,
            })
            .await
            .map_err(|e| RPCError::Unreachable(unreachable(e)))?;

        serde_json::from_slice(&proto_resp.into_inner().payload)
            .map_err(|e| RPCError::Unreachable(unreachable(e)))
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let payload =
            serde_json::to_vec(&rpc).map_err(|e| RPCError::Unreachable(unreachable(e)))?;
        let term = rpc.vote.leader_id().term;
        let candidate = rpc.vote.leader_id().node_id.to_string();

        let client = self
            .get_client()
            .map_err(|e| RPCError::Unreachable(unreachable(e)))?;

        let proto_resp = client
            .vote(ProtoVR {
                term,
                candidate_id: candidate,
                payload,
            })
            .await
            .map_err(|e| RPCError::Unreachable(unreachable(e)))?;

        serde_json::from_slice(&proto_resp.into_inner().payload)
            .map_err(|e| RPCError::Unreachable(unreachable(e)))
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        let payload =
            serde_json::to_vec(&rpc).map_err(|e| RPCError::Unreachable(unreachable(e)))?;
        let term = rpc.vote.leader_id().term;

        let client = self
            .get_client()
            .map_err(|e| RPCError::Unreachable(unreachable(e)))?;

        let proto_resp = client
            .install_snapshot(ProtoSR { term, payload })
            .await
            .map_err(|e| RPCError::Unreachable(unreachable(e)))?;

        serde_json::from_slice(&proto_resp.into_inner().payload)
            .map_err(|e| RPCError::Unreachable(unreachable(e)))
    }
}

/// Creates a [`GrpcNetwork`] per target peer node.
pub struct GrpcNetworkFactory;

impl RaftNetworkFactory<TypeConfig> for GrpcNetworkFactory {
    type Network = GrpcNetwork;

    async fn new_client(&mut self, _target: NodeId, node: &BasicNode) -> Self::Network {
        GrpcNetwork {
            target_addr: node.addr.clone(),
            client: None,
        }
    }
}

// ── Server side: receive RPCs, forward to the local Raft instance ─────────

/// Server-side implementation of `RaftTransport`, forwarding each RPC to the
/// local `openraft::Raft` instance. `None` until the Raft node has started.
#[derive(Clone)]
pub struct RaftTransportService {
    raft: Arc<RaftInstance>,
}

impl RaftTransportService {
    pub fn new(raft: Arc<RaftInstance>) -> Self {
        Self { raft }
    }

    pub fn into_server(self) -> RaftTransportServer<Self> {
        RaftTransportServer::new(self)
    }
}

#[tonic::async_trait]
impl RaftTransport for RaftTransportService {
    async fn append_entries(
        &self,
        req: Request<ProtoAER>,
    ) -> Result<Response<ProtoAEResp>, Status> {
        let payload = req.into_inner().payload;
        let raft_req: AppendEntriesRequest<TypeConfig> = serde_json::from_slice(&payload)
            .map_err(|e| {
                Status::invalid_argument(format!("failed to decode AppendEntriesRequest: {e}"))
            })?;

        let resp = self
            .raft
            .append_entries(raft_req)
            .await
            .map_err(|e| Status::internal(format!("Raft AppendEntries error: {e}")))?;

        let payload = serde_json::to_vec(&resp)
            .map_err(|e| Status::internal(format!("failed to encode response: {e}")))?;

        Ok(Response::new(ProtoAEResp {
            success: true,
            payload,
        }))
    }

    async fn vote(&self, req: Request<ProtoVR>) -> Result<Response<ProtoVResp>, Status> {
        let payload = req.into_inner().payload;
        let raft_req: VoteRequest<NodeId> = serde_json::from_slice(&payload)
            .map_err(|e| Status::invalid_argument(format!("failed to decode VoteRequest: {e}")))?;

        let resp = self
            .raft
            .vote(raft_req)
            .await
            .map_err(|e| Status::internal(format!("Raft Vote error: {e}")))?;

        let payload = serde_json::to_vec(&resp)
            .map_err(|e| Status::internal(format!("failed to encode response: {e}")))?;

        Ok(Response::new(ProtoVResp {
            vote_granted: resp.vote_granted,
            payload,
        }))
    }

    async fn install_snapshot(
        &self,
        req: Request<ProtoSR>,
    ) -> Result<Response<ProtoSResp>, Status> {
        let payload = req.into_inner().payload;
        let raft_req: InstallSnapshotRequest<TypeConfig> = serde_json::from_slice(&payload)
            .map_err(|e| {
                Status::invalid_argument(format!("failed to decode InstallSnapshotRequest: {e}"))
            })?;

        let resp = self
            .raft
            .install_snapshot(raft_req)
            .await
            .map_err(|e| Status::internal(format!("Raft InstallSnapshot error: {e}")))?;

        let payload = serde_json::to_vec(&resp)
            .map_err(|e| Status::internal(format!("failed to encode response: {e}")))?;

        Ok(Response::new(ProtoSResp { payload }))
    }
}

/// Starts the gRPC server bound to `raft_addr`, forwarding Raft RPCs to `raft`.
///
/// Runs indefinitely; the caller spawns this in a background task.
pub async fn start_transport_server(raft_addr: std::net::SocketAddr, raft: Arc<RaftInstance>) {
    let service = RaftTransportService::new(raft).into_server();
    tracing::info!(addr = %raft_addr, "Raft transport server starting");
    if let Err(e) = Server::builder().add_service(service).serve(raft_addr).await {
        tracing::error!(error = %e, "Raft transport server error");
    }
}
