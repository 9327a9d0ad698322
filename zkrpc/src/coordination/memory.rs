// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! In-process coordination tree.

use super::{child_path, AtomicConnectivity, ConnectivityState, CoordinationError, Coordinator};
use crate::endpoint::Endpoint;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// [`MemoryCoordinator`] keeps the coordination tree in process memory.
///
/// Registration mimics ephemeral sequential nodes: every registered endpoint
/// gets a fresh, monotonically numbered child of the service node. Clones share
/// the same tree, so one handle can drive the tree while a client reads it.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
    failures: Mutex<VecDeque<CoordinationError>>,
    state: AtomicConnectivity,
    sequence: AtomicU64,
    closes: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryCoordinator {
    /// Creates an empty, connected tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `endpoint` under `service_key`, creating missing parents.
    /// Returns the path of the new child.
    pub fn register(&self, service_key: &str, endpoint: &Endpoint) -> String {
        self.create(service_key, endpoint.to_payload())
    }

    /// Creates a sequential child of `parent` holding `payload`.
    pub fn create(&self, parent: &str, payload: Vec<u8>) -> String {
        let seq = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let path = child_path(parent, &format!("endpoint-{seq:010}"));
        let mut nodes = self.nodes();
        let mut ancestor = String::new();
        for segment in parent.split('/').filter(|s| !s.is_empty()) {
            ancestor.push('/');
            ancestor.push_str(segment);
            nodes.entry(ancestor.clone()).or_default();
        }
        nodes.insert(path.clone(), payload);
        path
    }

    /// Removes the node at `path` and its descendants, as session expiry does.
    pub fn remove(&self, path: &str) -> bool {
        let prefix = format!("{path}/");
        let mut nodes = self.nodes();
        nodes.retain(|k, _| !k.starts_with(&prefix));
        nodes.remove(path).is_some()
    }

    /// Simulates a state-change notification.
    pub fn set_state(&self, state: ConnectivityState) {
        self.inner.state.swap(state);
    }

    /// Makes the next read fail with `err`.
    pub fn fail_next(&self, err: CoordinationError) {
        self.inner.failures.lock().unwrap_or_else(PoisonError::into_inner).push_back(err);
    }

    /// How many times [`Coordinator::close`] has actually closed the session.
    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::Acquire)
    }

    fn nodes(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.inner.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), CoordinationError> {
        if self.is_closed() {
            return Err(CoordinationError::Closed);
        }
        match self.inner.failures.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Coordinator for MemoryCoordinator {
    fn state(&self) -> ConnectivityState {
        self.inner.state.load()
    }

    fn children<'s>(&'s self, path: &'s str) -> impl Future<Output = Result<Vec<String>, CoordinationError>> + Send + 's {
        async move {
            self.check()?;
            let nodes = self.nodes();
            if !nodes.contains_key(path) {
                return Err(CoordinationError::NodeMissing(path.to_owned()));
            }
            let prefix = format!("{}/", path.trim_end_matches('/'));
            Ok(nodes
                .keys()
                .filter_map(|k| k.strip_prefix(&prefix))
                .filter(|rest| !rest.contains('/'))
                .map(str::to_owned)
                .collect())
        }
    }

    fn payload<'s>(&'s self, path: &'s str) -> impl Future<Output = Result<Vec<u8>, CoordinationError>> + Send + 's {
        async move {
            self.check()?;
            self.nodes().get(path).cloned().ok_or_else(|| CoordinationError::NodeMissing(path.to_owned()))
        }
    }

    fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.closes.fetch_add(1, Ordering::AcqRel);
            self.inner.state.swap(ConnectivityState::Lost);
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
