//! gRPC services of a local coordination node
//!
//! `KV` and `Maintenance` are served on the client listener together with
//! any services the host registers; `Peer` is served on the peer listener.

use crate::common::Error;
use crate::coordinator::engine::Member;
use crate::coordinator::store::{self, EventKind, KvStore};
use crate::proto::kv_server::{Kv, KvServer};
use crate::proto::maintenance_server::{Maintenance, MaintenanceServer};
use crate::proto::peer_server::{Peer, PeerServer};
use crate::proto::*;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tonic::{Request, Response, Status};

impl From<store::KeyValue> for KeyValue {
    fn from(kv: store::KeyValue) -> Self {
        Self {
            key: kv.key,
            value: kv.value,
            create_revision: kv.create_revision,
            mod_revision: kv.mod_revision,
            version: kv.version,
        }
    }
}

impl From<KeyValue> for store::KeyValue {
    fn from(kv: KeyValue) -> Self {
        Self {
            key: kv.key,
            value: kv.value,
            create_revision: kv.create_revision,
            mod_revision: kv.mod_revision,
            version: kv.version,
        }
    }
}

impl From<&Member> for crate::proto::Member {
    fn from(m: &Member) -> Self {
        Self {
            name: m.name.clone(),
            id: m.id,
            peer_addr: m.peer_addr.clone(),
        }
    }
}

fn status(e: Error) -> Status {
    e.to_grpc_status()
}

/// KeyValue service backed by the node's [`KvStore`].
pub struct KvService {
    store: Arc<KvStore>,
}

impl KvService {
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }

    pub fn into_server(self) -> KvServer<Self> {
        KvServer::new(self)
    }
}

type WatchResponseStream = Pin<Box<dyn Stream<Item = Result<WatchResponse, Status>> + Send>>;

#[tonic::async_trait]
impl Kv for KvService {
    async fn range(&self, req: Request<RangeRequest>) -> Result<Response<RangeResponse>, Status> {
        let req = req.into_inner();
        let (kvs, revision) = self.store.range(&req.key, req.prefix).map_err(status)?;
        Ok(Response::new(RangeResponse {
            kvs: kvs.into_iter().map(Into::into).collect(),
            revision,
        }))
    }

    async fn put(&self, req: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        let req = req.into_inner();
        let revision = self.store.put(&req.key, req.value).map_err(status)?;
        Ok(Response::new(PutResponse { revision }))
    }

    async fn delete_range(
        &self,
        req: Request<DeleteRangeRequest>,
    ) -> Result<Response<DeleteRangeResponse>, Status> {
        let req = req.into_inner();
        let (deleted, revision) = self.store.delete(&req.key, req.prefix).map_err(status)?;
        Ok(Response::new(DeleteRangeResponse { deleted, revision }))
    }

    type WatchStream = WatchResponseStream;

    async fn watch(
        &self,
        req: Request<WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let WatchRequest { key, prefix } = req.into_inner();
        let mut rx = self.store.subscribe().map_err(status)?;
        tracing::debug!(key = %key, prefix, "watch started");

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let matches = if prefix {
                            event.kv.key.starts_with(&key)
                        } else {
                            event.kv.key == key
                        };
                        if !matches {
                            continue;
                        }
                        let kind = match event.kind {
                            EventKind::Put => crate::proto::EventKind::Put,
                            EventKind::Delete => crate::proto::EventKind::Delete,
                        };
                        let revision = event.kv.mod_revision;
                        yield Ok(WatchResponse {
                            kind: kind as i32,
                            kv: Some(event.kv.into()),
                            revision,
                        });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(key = %key, skipped, "watcher fell behind");
                        yield Err(Status::data_loss(format!("watcher missed {} events", skipped)));
                        break;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Response::new(Box::pin(stream) as WatchResponseStream))
    }
}

/// Member status.
pub struct MaintenanceService {
    name: String,
    member_id: u64,
    members: Arc<Vec<Member>>,
    store: Arc<KvStore>,
}

impl MaintenanceService {
    pub fn new(
        name: String,
        member_id: u64,
        members: Arc<Vec<Member>>,
        store: Arc<KvStore>,
    ) -> Self {
        Self {
            name,
            member_id,
            members,
            store,
        }
    }

    pub fn into_server(self) -> MaintenanceServer<Self> {
        MaintenanceServer::new(self)
    }
}

#[tonic::async_trait]
impl Maintenance for MaintenanceService {
    async fn status(
        &self,
        _req: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        if self.store.is_closed() {
            return Err(status(Error::NodeStopped));
        }
        Ok(Response::new(StatusResponse {
            name: self.name.clone(),
            member_id: self.member_id,
            version: crate::VERSION.to_string(),
            revision: self.store.revision(),
            members: self.members.iter().map(Into::into).collect(),
        }))
    }
}

/// Liveness probe between members.
pub struct PeerService {
    name: String,
    member_id: u64,
}

impl PeerService {
    pub fn new(name: String, member_id: u64) -> Self {
        Self { name, member_id }
    }

    pub fn into_server(self) -> PeerServer<Self> {
        PeerServer::new(self)
    }
}

#[tonic::async_trait]
impl Peer for PeerService {
    async fn ping(&self, req: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        tracing::trace!(from = %req.get_ref().from, "peer ping");
        Ok(Response::new(PingResponse {
            name: self.name.clone(),
            member_id: self.member_id,
        }))
    }
}
