// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Client config.

use super::dispatch::is_transient;
use super::CoreConfig;
use crate::coordination::zookeeper::SessionOptions;
use crate::transport::{Codec, TlsConfig};
use faststr::FastStr;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tarpc::client::RpcError;

/// Pacing and bounds of a retry loop.
///
/// The default retries forever at a 1s interval, waiting out any outage.
/// Set [`RetryPolicy::max_attempts`] or [`RetryPolicy::timeout`] to bound it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub interval: Duration,
    /// Give up after this many attempts.
    pub max_attempts: Option<u32>,
    /// Give up once this much time has passed.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: None,
            timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Set the pause between attempts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
    /// Give up after `max_attempts` attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
    /// Give up after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    /// Whether `attempt` (1-based) is the last one allowed.
    #[inline]
    pub(crate) fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Decides whether a failed call rebuilds the channel and retries.
pub type RetryFn = Arc<dyn Fn(&RpcError) -> bool + Send + Sync>;

/// Settings that control the behavior of the client.
#[derive(Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Node whose children are the live endpoints of the service,
    /// e.g. `/services/calculator`.
    pub service_key: FastStr,
    /// ZooKeeper session settings.
    pub session: SessionOptions,
    /// TLS settings; `None` connects in the clear.
    pub tls: Option<TlsConfig>,
    /// Transport serde codec.
    pub transport_codec: Codec,
    /// Settings that control the behavior of the underlying tarpc client.
    pub core_config: CoreConfig,
    /// Pacing of endpoint resolution.
    pub resolve_policy: RetryPolicy,
    /// Bounds of the rebuild-and-retry loop around a call.
    pub reconnect_policy: RetryPolicy,
    /// Classifies failed calls; transient failures are retried.
    pub retry_fn: RetryFn,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("service_key", &self.service_key)
            .field("session", &self.session)
            .field("tls", &self.tls)
            .field("transport_codec", &self.transport_codec)
            .field("core_config", &self.core_config)
            .field("resolve_policy", &self.resolve_policy)
            .field("reconnect_policy", &self.reconnect_policy)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// ZooKeeper ensemble used when none is given.
    pub const DEFAULT_COORDINATION_ENDPOINT: &'static str = "127.0.0.1:2181";

    /// Returns a default config for the service published under `service_key`.
    pub fn new(service_key: impl Into<FastStr>) -> Self {
        Self {
            service_key: service_key.into(),
            session: SessionOptions::new(Self::DEFAULT_COORDINATION_ENDPOINT),
            tls: None,
            transport_codec: Codec::default(),
            core_config: CoreConfig::default(),
            resolve_policy: RetryPolicy::default(),
            reconnect_policy: RetryPolicy::default(),
            retry_fn: Arc::new(is_transient),
        }
    }
    /// Set the ZooKeeper ensemble, e.g. `zk1:2181,zk2:2181`.
    pub fn with_coordination_endpoint(mut self, cluster: impl Into<FastStr>) -> Self {
        self.session.cluster = cluster.into();
        self
    }
    /// Set the ZooKeeper session settings.
    pub fn with_session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }
    /// Connect over TLS.
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
    /// Set transport serde codec
    pub fn with_transport_codec(mut self, transport_codec: Codec) -> Self {
        self.transport_codec = transport_codec;
        self
    }
    /// The number of requests that can be in flight at once.
    /// `max_in_flight_requests` controls the size of the map used by the client
    /// for storing pending requests.
    /// Default is 1000.
    pub fn with_max_in_flight_requests(mut self, max_in_flight_requests: usize) -> Self {
        self.core_config.max_in_flight_requests = max_in_flight_requests;
        self
    }
    /// The number of requests that can be buffered client-side before being sent.
    /// `pending_requests_buffer` controls the size of the channel clients use
    /// to communicate with the request dispatch task.
    /// Default is 100.
    pub fn with_pending_request_buffer(mut self, pending_request_buffer: usize) -> Self {
        self.core_config.pending_request_buffer = pending_request_buffer;
        self
    }
    /// Set the pacing of endpoint resolution.
    pub fn with_resolve_policy(mut self, resolve_policy: RetryPolicy) -> Self {
        self.resolve_policy = resolve_policy;
        self
    }
    /// Set the bounds of the rebuild-and-retry loop around a call.
    pub fn with_reconnect_policy(mut self, reconnect_policy: RetryPolicy) -> Self {
        self.reconnect_policy = reconnect_policy;
        self
    }
    /// Set a callback function for judging whether to rebuild the channel and
    /// re-initiate the request.
    pub fn with_retry_fn(mut self, retry_fn: impl Fn(&RpcError) -> bool + Send + Sync + 'static) -> Self {
        self.retry_fn = Arc::new(retry_fn);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientConfig, RetryPolicy};
    use crate::transport::Codec;
    use std::time::Duration;
    use tarpc::client::RpcError;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("/services/calculator");
        assert_eq!(config.service_key.as_str(), "/services/calculator");
        assert_eq!(config.session.cluster.as_str(), "127.0.0.1:2181");
        assert!(config.tls.is_none());
        assert_eq!(config.transport_codec, Codec::Bincode);
        assert_eq!(config.resolve_policy, RetryPolicy::default());
        assert_eq!(config.reconnect_policy.max_attempts, None);
        assert!((config.retry_fn)(&RpcError::Shutdown));
        assert!(!(config.retry_fn)(&RpcError::DeadlineExceeded));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("/svc")
            .with_coordination_endpoint("zk1:2181,zk2:2181")
            .with_transport_codec(Codec::Json)
            .with_max_in_flight_requests(10)
            .with_reconnect_policy(RetryPolicy::default().with_max_attempts(3))
            .with_retry_fn(|_| false);
        assert_eq!(config.session.cluster.as_str(), "zk1:2181,zk2:2181");
        assert_eq!(config.core_config.max_in_flight_requests, 10);
        assert_eq!(config.reconnect_policy.max_attempts, Some(3));
        assert!(!(config.retry_fn)(&RpcError::Shutdown));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::default().with_interval(Duration::from_millis(10));
        assert!(!policy.exhausted(u32::MAX));
        let policy = policy.with_max_attempts(2).with_timeout(Duration::from_secs(1));
        assert!(!policy.exhausted(1));
        assert!(policy.exhausted(2));
        assert_eq!(policy.timeout, Some(Duration::from_secs(1)));
    }
}
