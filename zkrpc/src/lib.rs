// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! zkrpc is a Rust RPC client base with ZooKeeper-backed service discovery.
//!
//! A [`Client`](client::Client) watches a service subtree in the coordination
//! service, picks one live `host:port` at random, lazily dials a (plain or TLS)
//! tarpc channel to it and dispatches the configured methods by name. Transient
//! transport failures rebuild the channel and retry the call.
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod coordination;
pub mod endpoint;
pub mod transport;

pub use client::{Client, ClientConfig, ClientError, MethodTable, RetryPolicy};
pub use coordination::{ConnectivityState, Coordinator};
pub use endpoint::Endpoint;

/// re-public `tarpc` crate something.
pub use crate::tarpc::*;

mod tarpc {
    #[doc(hidden)]
    pub use ::tarpc::serde;

    pub use ::tarpc::{tokio_serde, tokio_util};

    pub use ::tarpc::{context, server};

    pub use ::tarpc::{ClientMessage, Request, RequestName, Response, ServerError};
}
