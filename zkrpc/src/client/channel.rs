// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! RPC Channel
use super::{ClientConfig, ClientError, CoreConfig, Stub};
use crate::endpoint::Endpoint;
use crate::transport::{Codec, TlsConnector};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tarpc::client::Channel;
use tarpc::RequestName;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tracing::info;

/// [`Connect`] dials an endpoint and binds a stub to the new connection.
pub trait Connect: Send + Sync + 'static {
    /// Request type of the service.
    type Req: RequestName + Send + 'static;
    /// Response type of the service.
    type Resp: Send + 'static;
    /// Stub issuing calls over one connection.
    type Stub: Stub<Req = Self::Req, Resp = Self::Resp>;
    /// Builds a fresh stub connected to `endpoint`.
    fn connect<'s>(&'s self, endpoint: &'s Endpoint) -> impl Future<Output = Result<Self::Stub, ClientError>> + Send + 's;
}

/// [`TarpcConnector`] dials tarpc channels over TCP, optionally wrapped in TLS.
pub struct TarpcConnector<Req, Resp> {
    tls: Option<(TlsConnector, Option<String>)>,
    transport_codec: Codec,
    core_config: CoreConfig,
    _marker: PhantomData<fn() -> (Req, Resp)>,
}

impl<Req, Resp> fmt::Debug for TarpcConnector<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TarpcConnector")
            .field("tls", &self.tls.is_some())
            .field("transport_codec", &self.transport_codec)
            .field("core_config", &self.core_config)
            .finish()
    }
}

impl<Req, Resp> TarpcConnector<Req, Resp> {
    /// Creates a connector from the client config, loading TLS trust roots if configured.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let tls = match &config.tls {
            Some(tls) => Some((tls.connector()?, tls.server_name.clone())),
            None => None,
        };
        Ok(Self {
            tls,
            transport_codec: config.transport_codec,
            core_config: config.core_config.clone(),
            _marker: PhantomData,
        })
    }
}

impl<Req, Resp> Connect for TarpcConnector<Req, Resp>
where
    Req: RequestName + Serialize + Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    type Req = Req;
    type Resp = Resp;
    type Stub = Channel<Req, Resp>;

    fn connect<'s>(&'s self, endpoint: &'s Endpoint) -> impl Future<Output = Result<Self::Stub, ClientError>> + Send + 's {
        async move {
            let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
                .await
                .map_err(|source| ClientError::Connect { endpoint: endpoint.clone(), source })?;
            let Some((connector, server_name)) = &self.tls else {
                return Ok(self.transport_codec.spawn_client(stream, self.core_config.clone()));
            };
            let name = server_name.as_deref().unwrap_or(&endpoint.host);
            let server_name = ServerName::try_from(name).map_err(|_| ClientError::InvalidServerName(name.to_owned()))?.to_owned();
            let stream = connector
                .connect(server_name, stream)
                .await
                .map_err(|source| ClientError::Handshake { endpoint: endpoint.clone(), source })?;
            Ok(self.transport_codec.spawn_client(stream, self.core_config.clone()))
        }
    }
}

/// The live stub of a client and the endpoint it is bound to.
pub struct ActiveChannel<S> {
    /// Incremented on every rebuild.
    pub generation: u64,
    /// Endpoint the stub is connected to.
    pub endpoint: Endpoint,
    /// Stub issuing calls.
    pub stub: Arc<S>,
}

impl<S> Clone for ActiveChannel<S> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            endpoint: self.endpoint.clone(),
            stub: self.stub.clone(),
        }
    }
}

/// Owns the single channel/stub pair of a client.
///
/// [`ChannelManager::connect`] is the only writer; it swaps in a fresh pair and
/// drops the old one, never mutating a pair in place.
pub struct ChannelManager<K: Connect> {
    connector: K,
    active: RwLock<Option<ActiveChannel<K::Stub>>>,
    generation: AtomicU64,
}

impl<K: Connect> ChannelManager<K> {
    /// Creates a manager without a channel.
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            active: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// The current pair, if one exists.
    pub fn current(&self) -> Option<ActiveChannel<K::Stub>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Dials `endpoint` and replaces the current pair with the new one.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<ActiveChannel<K::Stub>, ClientError> {
        info!("[ZKRPC] Using endpoint: {endpoint}");
        let stub = self.connector.connect(&endpoint).await?;
        let channel = ActiveChannel {
            generation: self.generation.fetch_add(1, Ordering::AcqRel) + 1,
            endpoint,
            stub: Arc::new(stub),
        };
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(channel.clone());
        Ok(channel)
    }

    /// Drops the current pair.
    pub fn clear(&self) {
        self.active.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// The connector used to build pairs.
    #[inline]
    pub fn connector(&self) -> &K {
        &self.connector
    }
}
