// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! ZooKeeper session.

use super::{child_path, AtomicConnectivity, ConnectivityState, CoordinationError, Coordinator};
use crate::endpoint::Endpoint;
use faststr::FastStr;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use zookeeper_client as zk;

/// Settings of a ZooKeeper session.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SessionOptions {
    /// Comma separated `host:port` list of the ensemble.
    pub cluster: FastStr,
    /// Session timeout negotiated with the ensemble.
    /// Default is 10s.
    pub session_timeout: Duration,
    /// Whether a read-only server is acceptable.
    /// Default is true, the client only reads the tree.
    pub readonly: bool,
    /// Pause between attempts to re-establish an expired session.
    /// Default is 1s.
    pub reconnect_interval: Duration,
}

impl SessionOptions {
    /// Returns default options for `cluster`.
    pub fn new(cluster: impl Into<FastStr>) -> Self {
        Self {
            cluster: cluster.into(),
            session_timeout: Duration::from_secs(10),
            readonly: true,
            reconnect_interval: Duration::from_secs(1),
        }
    }
    /// Set the session timeout.
    pub fn with_session_timeout(mut self, session_timeout: Duration) -> Self {
        self.session_timeout = session_timeout;
        self
    }
    /// Set whether a read-only server is acceptable.
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }
    /// Set the pause between attempts to re-establish an expired session.
    pub fn with_reconnect_interval(mut self, reconnect_interval: Duration) -> Self {
        self.reconnect_interval = reconnect_interval;
        self
    }
}

/// [`ZkSession`] is a live ZooKeeper session.
///
/// A background task follows the session state and maintains the
/// connectivity flag. An expired session is replaced by a fresh one.
pub struct ZkSession {
    client: Arc<Mutex<Option<zk::Client>>>,
    state: Arc<AtomicConnectivity>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl ZkSession {
    /// Opens a session and starts following its state.
    pub async fn start(options: SessionOptions) -> Result<Self, CoordinationError> {
        let client = open(&options).await.map_err(|e| map_err("/", e))?;
        info!("[ZKRPC] ZooKeeper session established with {}", options.cluster);
        let state_watcher = client.state_watcher();
        let client = Arc::new(Mutex::new(Some(client)));
        let state = Arc::new(AtomicConnectivity::new(ConnectivityState::Connected));
        let closed = Arc::new(AtomicBool::new(false));
        let watcher = tokio::spawn(follow_state(options, client.clone(), state.clone(), closed.clone(), state_watcher));
        Ok(Self {
            client,
            state,
            watcher: Mutex::new(Some(watcher)),
            closed,
        })
    }

    /// Closes the session and waits up to `grace` for the ensemble to
    /// acknowledge, so ephemeral nodes vanish at once instead of at expiry.
    pub async fn shutdown(&self, grace: Duration) {
        // Only the watcher may outlive the close; a client handle would keep the session open.
        let watcher = self.client.lock().unwrap_or_else(PoisonError::into_inner).as_ref().map(zk::Client::state_watcher);
        self.close();
        let Some(mut watcher) = watcher else {
            return;
        };
        if !until_terminated(&mut watcher, grace).await {
            warn!("[ZKRPC] ZooKeeper session did not close within {grace:?}");
        }
    }

    /// Publishes `endpoint` as an ephemeral sequential child of `service_key`,
    /// creating missing parents. Returns the path of the new child.
    pub async fn register(&self, service_key: &str, endpoint: &Endpoint) -> Result<String, CoordinationError> {
        let client = self.client()?;
        let persistent = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        let mut ancestor = String::new();
        for segment in service_key.split('/').filter(|s| !s.is_empty()) {
            ancestor.push('/');
            ancestor.push_str(segment);
            match client.create(&ancestor, &[], &persistent).await {
                Ok(_) | Err(zk::Error::NodeExists) => {},
                Err(e) => return Err(map_err(&ancestor, e)),
            }
        }
        let prefix = child_path(service_key, "endpoint-");
        let ephemeral = zk::CreateMode::EphemeralSequential.with_acls(zk::Acls::anyone_all());
        let (_, sequence) = client.create(&prefix, &endpoint.to_payload(), &ephemeral).await.map_err(|e| map_err(&prefix, e))?;
        Ok(format!("{prefix}{sequence}"))
    }

    fn client(&self) -> Result<zk::Client, CoordinationError> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner).clone().ok_or(CoordinationError::Closed)
    }
}

impl Coordinator for ZkSession {
    fn state(&self) -> ConnectivityState {
        self.state.load()
    }

    fn children<'s>(&'s self, path: &'s str) -> impl Future<Output = Result<Vec<String>, CoordinationError>> + Send + 's {
        async move {
            let client = self.client()?;
            let (children, _) = client.get_children(path).await.map_err(|e| map_err(path, e))?;
            Ok(children)
        }
    }

    fn payload<'s>(&'s self, path: &'s str) -> impl Future<Output = Result<Vec<u8>, CoordinationError>> + Send + 's {
        async move {
            let client = self.client()?;
            let (payload, _) = client.get_data(path).await.map_err(|e| map_err(path, e))?;
            Ok(payload)
        }
    }

    fn close(&self) {
        // Set under the slot lock, so a session reopened concurrently is either seen here or never installed.
        let client = {
            let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            slot.take()
        };
        if let Some(watcher) = self.watcher.lock().unwrap_or_else(PoisonError::into_inner).take() {
            watcher.abort();
        }
        // The session ends with its last client handle.
        drop(client);
        self.state.swap(ConnectivityState::Lost);
        info!("[ZKRPC] ZooKeeper session closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for ZkSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn open(options: &SessionOptions) -> Result<zk::Client, zk::Error> {
    zk::Client::connector()
        .session_timeout(options.session_timeout)
        .readonly(options.readonly)
        .connect(&options.cluster)
        .await
}

/// Maps a session state notification to the connectivity flag.
fn connectivity_of(state: zk::SessionState) -> ConnectivityState {
    match state {
        zk::SessionState::Expired | zk::SessionState::Closed | zk::SessionState::AuthFailed => ConnectivityState::Lost,
        zk::SessionState::Disconnected => ConnectivityState::Suspended,
        _ => ConnectivityState::Connected,
    }
}

/// Stores a reopened session unless the owner closed in the meantime.
/// Returns false, dropping `fresh`, if closed.
fn install<T>(slot: &Mutex<Option<T>>, closed: &AtomicBool, state: &AtomicConnectivity, fresh: T) -> bool {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if closed.load(Ordering::Acquire) {
        return false;
    }
    *slot = Some(fresh);
    state.swap(ConnectivityState::Connected);
    true
}

/// Source of session state changes.
trait SessionStates {
    async fn changed(&mut self) -> zk::SessionState;
}

impl SessionStates for zk::StateWatcher {
    async fn changed(&mut self) -> zk::SessionState {
        zk::StateWatcher::changed(self).await
    }
}

/// Waits until a terminal state arrives or `grace` elapses.
async fn until_terminated(states: &mut impl SessionStates, grace: Duration) -> bool {
    let terminated = async {
        while !states.changed().await.is_terminated() {}
    };
    tokio::time::timeout(grace, terminated).await.is_ok()
}

async fn follow_state(
    options: SessionOptions,
    client: Arc<Mutex<Option<zk::Client>>>,
    state: Arc<AtomicConnectivity>,
    closed: Arc<AtomicBool>,
    mut watcher: zk::StateWatcher,
) {
    loop {
        let session_state = watcher.changed().await;
        let next = connectivity_of(session_state);
        if state.swap(next) != next {
            match next {
                ConnectivityState::Connected => info!("[ZKRPC] ZooKeeper connected"),
                ConnectivityState::Suspended => info!("[ZKRPC] ZooKeeper disconnected"),
                ConnectivityState::Lost => info!("[ZKRPC] ZooKeeper session lost"),
            }
        }
        match session_state {
            zk::SessionState::Expired => {},
            zk::SessionState::Closed | zk::SessionState::AuthFailed => return,
            _ => continue,
        }
        // The expired client is unusable; replace it with a fresh session.
        loop {
            match open(&options).await {
                Ok(fresh) => {
                    watcher = fresh.state_watcher();
                    if !install(&client, &closed, &state, fresh) {
                        return;
                    }
                    info!("[ZKRPC] ZooKeeper session re-established");
                    break;
                },
                Err(e) => {
                    warn!("[ZKRPC] failed to re-establish ZooKeeper session: {e}");
                    tokio::time::sleep(options.reconnect_interval).await;
                },
            }
        }
    }
}

fn map_err(path: &str, err: zk::Error) -> CoordinationError {
    match err {
        zk::Error::NoNode => CoordinationError::NodeMissing(path.to_owned()),
        zk::Error::ConnectionLoss | zk::Error::SessionExpired => CoordinationError::ConnectionLost,
        err => CoordinationError::Unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::{connectivity_of, install, map_err, until_terminated, SessionOptions, SessionStates};
    use crate::coordination::{AtomicConnectivity, ConnectivityState, CoordinationError};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;
    use std::time::Duration;
    use zookeeper_client as zk;

    #[test]
    fn test_connectivity_of() {
        assert_eq!(connectivity_of(zk::SessionState::SyncConnected), ConnectivityState::Connected);
        assert_eq!(connectivity_of(zk::SessionState::ConnectedReadOnly), ConnectivityState::Connected);
        assert_eq!(connectivity_of(zk::SessionState::Disconnected), ConnectivityState::Suspended);
        assert_eq!(connectivity_of(zk::SessionState::Expired), ConnectivityState::Lost);
        assert_eq!(connectivity_of(zk::SessionState::Closed), ConnectivityState::Lost);
    }

    #[test]
    fn test_map_err() {
        assert_eq!(map_err("/a", zk::Error::NoNode), CoordinationError::NodeMissing("/a".into()));
        assert_eq!(map_err("/a", zk::Error::ConnectionLoss), CoordinationError::ConnectionLost);
        assert_eq!(map_err("/a", zk::Error::SessionExpired), CoordinationError::ConnectionLost);
        assert!(matches!(map_err("/a", zk::Error::NodeExists), CoordinationError::Unavailable(_)));
    }

    #[test]
    fn test_session_options() {
        let options = SessionOptions::new("127.0.0.1:2181").with_session_timeout(Duration::from_secs(3)).with_readonly(false);
        assert_eq!(options.cluster.as_str(), "127.0.0.1:2181");
        assert_eq!(options.session_timeout, Duration::from_secs(3));
        assert!(!options.readonly);
        assert_eq!(options.reconnect_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_install_after_close_drops_session() {
        let slot = Mutex::new(None);
        let state = AtomicConnectivity::new(ConnectivityState::Lost);
        assert!(!install(&slot, &AtomicBool::new(true), &state, "fresh"));
        assert_eq!(*slot.lock().unwrap(), None);
        assert_eq!(state.load(), ConnectivityState::Lost);

        assert!(install(&slot, &AtomicBool::new(false), &state, "fresh"));
        assert_eq!(*slot.lock().unwrap(), Some("fresh"));
        assert_eq!(state.load(), ConnectivityState::Connected);
    }

    /// Replays states, then stays silent.
    struct Replay(VecDeque<zk::SessionState>);

    impl SessionStates for Replay {
        async fn changed(&mut self) -> zk::SessionState {
            match self.0.pop_front() {
                Some(state) => state,
                None => std::future::pending().await,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_terminated() {
        let mut states = Replay(VecDeque::from([zk::SessionState::SyncConnected, zk::SessionState::Disconnected, zk::SessionState::Closed]));
        assert!(until_terminated(&mut states, Duration::from_secs(1)).await);
        assert!(states.0.is_empty());

        // A session that never reports closing gives up after the grace period.
        let mut silent = Replay(VecDeque::from([zk::SessionState::SyncConnected]));
        assert!(!until_terminated(&mut silent, Duration::from_secs(1)).await);
    }
}
