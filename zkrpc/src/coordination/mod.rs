// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Coordination service sessions.
//!
//! Servers publish themselves as ephemeral sequential children of a service
//! node; the coordination service removes a child when its owner's session
//! ends. A [`Coordinator`] gives the client read access to that subtree plus a
//! connectivity flag driven by session state notifications.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};

pub use memory::MemoryCoordinator;
pub use zookeeper::ZkSession;

mod memory;
pub mod zookeeper;

/// Connectivity of the coordination session, as last reported by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectivityState {
    /// The session is usable.
    Connected = 0,
    /// The session has expired or was closed.
    Lost = 1,
    /// The connection dropped; the session may still recover.
    Suspended = 2,
}

impl ConnectivityState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connected,
            1 => Self::Lost,
            _ => Self::Suspended,
        }
    }
}

/// A [`ConnectivityState`] cell written by a session's notification task and
/// read from callers without further locking.
#[derive(Debug)]
pub struct AtomicConnectivity(AtomicU8);

impl AtomicConnectivity {
    /// Creates a cell holding `state`.
    pub const fn new(state: ConnectivityState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Loads the current state.
    #[inline]
    pub fn load(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Stores `state` and returns the previous one.
    #[inline]
    pub fn swap(&self, state: ConnectivityState) -> ConnectivityState {
        ConnectivityState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }
}

impl Default for AtomicConnectivity {
    fn default() -> Self {
        Self::new(ConnectivityState::Connected)
    }
}

/// Errors raised while reading the coordination tree.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// The node does not exist.
    #[error("node {0} does not exist")]
    NodeMissing(String),
    /// The connection to the coordination service was lost mid-request.
    #[error("connection to the coordination service lost")]
    ConnectionLost,
    /// The session was closed locally.
    #[error("coordination session closed")]
    Closed,
    /// Any other session or request failure.
    #[error("coordination service unavailable: {0}")]
    Unavailable(String),
}

/// Data and child names of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    /// Raw node payload.
    pub payload: Vec<u8>,
    /// Child names, relative to the node.
    pub children: Vec<String>,
}

/// [`Coordinator`] is a live session to a tree-structured coordination service.
pub trait Coordinator: Send + Sync + 'static {
    /// Current connectivity, as last reported by the session.
    fn state(&self) -> ConnectivityState;
    /// Lists the child names of `path`.
    fn children<'s>(&'s self, path: &'s str) -> impl Future<Output = Result<Vec<String>, CoordinationError>> + Send + 's;
    /// Reads the payload of `path`.
    fn payload<'s>(&'s self, path: &'s str) -> impl Future<Output = Result<Vec<u8>, CoordinationError>> + Send + 's;
    /// Reads both the payload and the child names of `path`.
    fn read<'s>(&'s self, path: &'s str) -> impl Future<Output = Result<Node, CoordinationError>> + Send + 's {
        async move {
            let payload = self.payload(path).await?;
            let children = self.children(path).await?;
            Ok(Node { payload, children })
        }
    }
    /// Ends the session. Calling it again is a no-op.
    fn close(&self);
    /// Whether [`Coordinator::close`] has run.
    fn is_closed(&self) -> bool;
}

/// Joins a parent path and a child name.
pub(crate) fn child_path(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}
