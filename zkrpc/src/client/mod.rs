// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Provides a client that discovers a live server, connects to it and
//! dispatches named methods, reconnecting on transient failures.

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod resolver;

pub use self::core::stub::Stub;
pub use self::core::{Config as CoreConfig, RpcError};
pub use channel::{ActiveChannel, ChannelManager, Connect, TarpcConnector};
pub use config::{ClientConfig, RetryFn, RetryPolicy};
pub use dispatch::{is_transient, MethodDescriptor, MethodTable, Status};
pub use resolver::EndpointResolver;

/// re-public tarpc some types.
pub mod core {
    pub use ::tarpc::client::*;
}

use crate::context;
use crate::coordination::zookeeper::ZkSession;
use crate::coordination::{CoordinationError, Coordinator};
use crate::endpoint::Endpoint;
use crate::transport::TlsError;
use faststr::FastStr;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Errors surfaced by the client.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// The coordination session could not be started or used.
    #[error("coordination service: {0}")]
    Coordination(#[from] CoordinationError),
    /// No method of that name is configured.
    #[error("unknown method {0}")]
    UnknownMethod(FastStr),
    /// The keyword arguments do not fit the method's request shape.
    #[error("invalid request for {method}: {source}")]
    InvalidRequest {
        /// Method name.
        method: FastStr,
        /// Shape validation error.
        #[source]
        source: serde_json::Error,
    },
    /// TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// The TCP connection to a resolved endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint dialed.
        endpoint: Endpoint,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The TLS handshake with a resolved endpoint failed.
    #[error("TLS handshake with {endpoint} failed: {source}")]
    Handshake {
        /// Endpoint dialed.
        endpoint: Endpoint,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The name to verify the server certificate against is not a valid DNS name or IP address.
    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),
    /// The remote call failed with a non-retried error.
    #[error("remote call failed: {0}")]
    Rpc(#[from] RpcError),
    /// A bounded retry loop ran out of time.
    #[error("gave up after {0:?}")]
    Timeout(Duration),
    /// A bounded retry loop ran out of attempts.
    #[error("gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Whether re-resolving and dialing again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Connect { .. })
    }
}

/// A client of one logical service.
///
/// The client owns a coordination session, at most one channel/stub pair and
/// the table of methods it dispatches. The pair is created on first use and
/// rebuilt, against a freshly resolved endpoint, whenever a call fails with a
/// transient error.
pub struct Client<C, K>
where
    C: Coordinator,
    K: Connect,
{
    session: C,
    resolver: EndpointResolver,
    channels: ChannelManager<K>,
    methods: MethodTable<K::Req>,
    reconnect_policy: RetryPolicy,
    retry_fn: RetryFn,
    connecting: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl<Req, Resp> Client<ZkSession, TarpcConnector<Req, Resp>>
where
    Req: crate::RequestName + Serialize + Send + 'static,
    Resp: DeserializeOwned + Send + 'static,
{
    /// Starts a ZooKeeper session and returns a client dispatching `methods`
    /// over tarpc channels.
    ///
    /// TLS trust roots are loaded before the session starts; unreadable files
    /// fail here.
    pub async fn connect(config: ClientConfig, methods: MethodTable<Req>) -> Result<Self, ClientError> {
        let connector = TarpcConnector::new(&config)?;
        let session = ZkSession::start(config.session.clone()).await?;
        Ok(Self::new(config, session, connector, methods))
    }
}

impl<C, K> Client<C, K>
where
    C: Coordinator,
    K: Connect,
{
    /// Assembles a client from its parts.
    pub fn new(config: ClientConfig, session: C, connector: K, methods: MethodTable<K::Req>) -> Self {
        Self {
            session,
            resolver: EndpointResolver::new(config.service_key, config.resolve_policy),
            channels: ChannelManager::new(connector),
            methods,
            reconnect_policy: config.reconnect_policy,
            retry_fn: config.retry_fn,
            connecting: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Calls `method` with keyword arguments given as a JSON object.
    ///
    /// The request is built by the method's shape, so unknown or missing
    /// fields fail before anything is sent. Transient failures rebuild the
    /// channel and retry; any other failure is returned as is.
    pub async fn call(&self, method: &str, args: Value) -> Result<K::Resp, ClientError> {
        let descriptor = self.methods.get(method).ok_or_else(|| ClientError::UnknownMethod(FastStr::new(method)))?;
        let request = descriptor.build(&args)?;
        self.dispatch(descriptor.name(), request, || descriptor.build(&args)).await
    }

    /// Calls the method named by the request `build` makes; `build` runs
    /// again for every retry.
    pub async fn invoke<F>(&self, build: F) -> Result<K::Resp, ClientError>
    where
        F: Fn() -> K::Req,
    {
        let request = build();
        let method = crate::RequestName::name(&request);
        self.dispatch(method, request, || Ok(build())).await
    }

    async fn dispatch<F>(&self, method: &str, request: K::Req, rebuild: F) -> Result<K::Resp, ClientError>
    where
        F: Fn() -> Result<K::Req, ClientError>,
    {
        let attempts = self.dispatch_loop(method, request, rebuild);
        match self.reconnect_policy.timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempts).await.map_err(|_| ClientError::Timeout(timeout))?,
            None => attempts.await,
        }
    }

    async fn dispatch_loop<F>(&self, method: &str, request: K::Req, rebuild: F) -> Result<K::Resp, ClientError>
    where
        F: Fn() -> Result<K::Req, ClientError>,
    {
        self.ensure_open()?;
        let mut request = Some(request);
        let mut channel = match self.channels.current() {
            Some(channel) => channel,
            None => self.reconnect(None).await?,
        };
        for attempt in 1u32.. {
            let req = match request.take() {
                Some(req) => req,
                None => rebuild()?,
            };
            match channel.stub.call(context::current(), req).await {
                Ok(resp) => return Ok(resp),
                Err(err) if (self.retry_fn)(&err) => {
                    if self.reconnect_policy.exhausted(attempt) {
                        warn!("[ZKRPC] {method} on {} failed: {err}. Giving up.", channel.endpoint);
                        return Err(ClientError::RetriesExhausted { attempts: attempt });
                    }
                    self.ensure_open()?;
                    warn!("[ZKRPC] {method} on {} failed: {err}. Reconnecting...", channel.endpoint);
                    channel = self.reconnect(Some(channel.generation)).await?;
                },
                Err(err) => return Err(ClientError::Rpc(err)),
            }
        }
        unreachable!("[ZKRPC] Wow, that was a lot of attempts!");
    }

    /// Resolves an endpoint and swaps in a fresh pair, unless the pair has
    /// moved past `stale` already.
    async fn reconnect(&self, stale: Option<u64>) -> Result<ActiveChannel<K::Stub>, ClientError> {
        let _connecting = self.connecting.lock().await;
        if let Some(current) = self.channels.current() {
            if Some(current.generation) != stale {
                return Ok(current);
            }
        }
        for attempt in 1u32.. {
            self.ensure_open()?;
            let endpoint = self.resolver.resolve(&self.session).await?;
            match self.channels.connect(endpoint).await {
                Ok(channel) => return Ok(channel),
                Err(e) if e.is_transient() && !self.reconnect_policy.exhausted(attempt) => {
                    warn!("[ZKRPC] {e}");
                    tokio::time::sleep(self.reconnect_policy.interval).await;
                },
                Err(e) => return Err(e),
            }
        }
        unreachable!("[ZKRPC] Wow, that was a lot of attempts!");
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }

    /// Endpoint of the current channel, if one is connected.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.channels.current().map(|c| c.endpoint)
    }

    /// The methods this client dispatches.
    #[inline]
    pub fn methods(&self) -> &MethodTable<K::Req> {
        &self.methods
    }

    /// The coordination session.
    #[inline]
    pub fn session(&self) -> &C {
        &self.session
    }

    /// Ends the coordination session and drops the channel.
    ///
    /// Runs once; later calls, including the one made on drop, are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session.close();
        self.channels.clear();
        info!("[ZKRPC] client of {} closed", self.resolver.service_key());
    }

    /// Whether [`Client::close`] has run.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<C, K> Drop for Client<C, K>
where
    C: Coordinator,
    K: Connect,
{
    fn drop(&mut self) {
        self.close();
    }
}
