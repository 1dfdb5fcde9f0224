//! Coordination client factory
//!
//! Turns an address specification such as `"10.0.0.1:2379,10.0.0.2:2379"`
//! into a [`CoordClient`]. Building a client opens no connection; the
//! channel connects on the first call. Every key sent through a client is
//! namespaced under its key prefix, and every call is bounded by its
//! timeout.

use crate::common::{
    parse_host_port_addr, Error, Result, TimeoutConfig, DEFAULT_CLIENT_TIMEOUT, DEFAULT_KEY_PREFIX,
};
use crate::coordinator::store::{EventKind, KeyValue, WatchEvent};
use crate::proto::kv_client::KvClient;
use crate::proto::maintenance_client::MaintenanceClient;
use crate::proto::{
    DeleteRangeRequest, PutRequest, RangeRequest, StatusRequest, StatusResponse, WatchRequest,
};
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send>>;

/// Builds clients sharing one default timeout and key prefix.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    default_timeout: Duration,
    key_prefix: String,
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_TIMEOUT, DEFAULT_KEY_PREFIX)
    }
}

impl ClientFactory {
    pub fn new(default_timeout: Duration, key_prefix: impl Into<String>) -> Self {
        Self {
            default_timeout,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn from_config(config: &TimeoutConfig) -> Result<Self> {
        Ok(Self::new(config.client_timeout()?, config.key_prefix.clone()))
    }

    /// Parse `addr` and bind a client to the resulting endpoints.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new_client(&self, addr: &str) -> Result<CoordClient> {
        let endpoints = parse_host_port_addr(addr)?;
        let targets = endpoints
            .iter()
            .map(|ep| {
                Endpoint::from_shared(format!("http://{}", ep))
                    .map(|e| e.connect_timeout(self.default_timeout))
                    .map_err(|e| Error::address(ep.as_str(), e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let channel = Channel::balance_list(targets.into_iter());
        tracing::debug!(
            endpoints = ?endpoints,
            timeout = ?self.default_timeout,
            key_prefix = %self.key_prefix,
            "coordination client created"
        );

        Ok(CoordClient {
            endpoints,
            default_timeout: self.default_timeout,
            key_prefix: self.key_prefix.clone(),
            kv: KvClient::new(channel.clone()),
            maintenance: MaintenanceClient::new(channel),
        })
    }
}

/// Client with the default timeout and key prefix.
pub fn new_client(addr: &str) -> Result<CoordClient> {
    ClientFactory::default().new_client(addr)
}

/// Handle to a coordination cluster. Cheap to clone; clones share the
/// underlying channel.
#[derive(Clone)]
pub struct CoordClient {
    endpoints: Vec<String>,
    default_timeout: Duration,
    key_prefix: String,
    kv: KvClient<Channel>,
    maintenance: MaintenanceClient<Channel>,
}

impl std::fmt::Debug for CoordClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordClient")
            .field("endpoints", &self.endpoints)
            .field("default_timeout", &self.default_timeout)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl CoordClient {
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// A clone whose calls are bounded by `timeout` instead.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            default_timeout: timeout,
            ..self.clone()
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn strip_prefix(prefix: &str, kv: crate::proto::KeyValue) -> KeyValue {
        let mut kv: KeyValue = kv.into();
        if let Some(stripped) = kv.key.strip_prefix(prefix) {
            kv.key = stripped.to_string();
        }
        kv
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.default_timeout);
        request
    }

    async fn call<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
    {
        match tokio::time::timeout(self.default_timeout, fut).await {
            Ok(Ok(response)) => Ok(response.into_inner()),
            Ok(Err(status)) => Err(Error::Grpc(status)),
            Err(_) => Err(Error::Timeout(format!(
                "{} did not finish within {:?}",
                op, self.default_timeout
            ))),
        }
    }

    async fn range(&self, key: &str, prefix: bool) -> Result<Vec<KeyValue>> {
        let mut kv = self.kv.clone();
        let request = self.request(RangeRequest {
            key: self.full_key(key),
            prefix,
        });
        let response = self.call("range", kv.range(request)).await?;
        Ok(response
            .kvs
            .into_iter()
            .map(|kv| Self::strip_prefix(&self.key_prefix, kv))
            .collect())
    }

    pub async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        Ok(self.range(key, false).await?.into_iter().next())
    }

    pub async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.range(prefix, true).await
    }

    /// Returns the revision of the write.
    pub async fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<i64> {
        let mut kv = self.kv.clone();
        let request = self.request(PutRequest {
            key: self.full_key(key),
            value: value.into(),
        });
        Ok(self.call("put", kv.put(request)).await?.revision)
    }

    async fn delete_range(&self, key: &str, prefix: bool) -> Result<i64> {
        let mut kv = self.kv.clone();
        let request = self.request(DeleteRangeRequest {
            key: self.full_key(key),
            prefix,
        });
        Ok(self.call("delete", kv.delete_range(request)).await?.deleted)
    }

    /// Returns the number of deleted keys.
    pub async fn delete(&self, key: &str) -> Result<i64> {
        self.delete_range(key, false).await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<i64> {
        self.delete_range(prefix, true).await
    }

    async fn watch_range(&self, key: &str, prefix: bool) -> Result<WatchStream> {
        let mut kv = self.kv.clone();
        let request = self.request(WatchRequest {
            key: self.full_key(key),
            prefix,
        });
        // Only establishing the stream is bounded by the timeout
        let streaming = self.call("watch", kv.watch(request)).await?;

        let key_prefix = self.key_prefix.clone();
        let events = streaming.map(move |item| -> Result<WatchEvent> {
            let response = item?;
            let kind = match response.kind() {
                crate::proto::EventKind::Put => EventKind::Put,
                crate::proto::EventKind::Delete => EventKind::Delete,
            };
            Ok(WatchEvent {
                kind,
                kv: Self::strip_prefix(&key_prefix, response.kv.unwrap_or_default()),
            })
        });
        Ok(Box::pin(events))
    }

    pub async fn watch(&self, key: &str) -> Result<WatchStream> {
        self.watch_range(key, false).await
    }

    pub async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        self.watch_range(prefix, true).await
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let mut maintenance = self.maintenance.clone();
        let request = self.request(StatusRequest {});
        self.call("status", maintenance.status(request)).await
    }
}
