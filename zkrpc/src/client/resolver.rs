// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Endpoint resolution through the coordination tree.

use super::{ClientError, RetryPolicy};
use crate::coordination::{child_path, ConnectivityState, CoordinationError, Coordinator};
use crate::endpoint::Endpoint;
use faststr::FastStr;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Turns a service key into one live endpoint, chosen uniformly at random.
#[derive(Clone, Debug)]
pub struct EndpointResolver {
    service_key: FastStr,
    policy: RetryPolicy,
}

impl EndpointResolver {
    /// Creates a resolver for the endpoints published under `service_key`.
    pub fn new(service_key: impl Into<FastStr>, policy: RetryPolicy) -> Self {
        Self {
            service_key: service_key.into(),
            policy,
        }
    }

    /// The service node this resolver reads.
    #[inline]
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// Waits until the session is connected and at least one endpoint is
    /// published, then returns one of them at random.
    ///
    /// Missing nodes and lost connections are waited out like an empty
    /// endpoint set. Only the policy bounds, or a closed session, end the wait
    /// with an error.
    pub async fn resolve<C: Coordinator>(&self, session: &C) -> Result<Endpoint, ClientError> {
        match self.policy.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.resolve_loop(session)).await.map_err(|_| ClientError::Timeout(timeout))?,
            None => self.resolve_loop(session).await,
        }
    }

    async fn resolve_loop<C: Coordinator>(&self, session: &C) -> Result<Endpoint, ClientError> {
        for attempt in 1u32.. {
            if session.is_closed() {
                return Err(ClientError::Closed);
            }
            if session.state() != ConnectivityState::Connected {
                info!("[ZKRPC] waiting for ZooKeeper connection");
            } else {
                match self.snapshot(session).await {
                    Ok(endpoints) => match endpoints.choose(&mut rand::thread_rng()) {
                        Some(endpoint) => {
                            debug!("[ZKRPC] resolved {} among {} endpoints", endpoint, endpoints.len());
                            return Ok(endpoint.clone());
                        },
                        None => info!("[ZKRPC] waiting for hosts to be available in {}", self.service_key),
                    },
                    Err(CoordinationError::Closed) => return Err(ClientError::Closed),
                    Err(e) => debug!("[ZKRPC] reading {} failed: {e}", self.service_key),
                }
            }
            if self.policy.exhausted(attempt) {
                return Err(ClientError::RetriesExhausted { attempts: attempt });
            }
            tokio::time::sleep(self.policy.interval).await;
        }
        unreachable!("[ZKRPC] Wow, that was a lot of attempts!");
    }

    /// Reads every published endpoint, deduplicated.
    async fn snapshot<C: Coordinator>(&self, session: &C) -> Result<Vec<Endpoint>, CoordinationError> {
        let mut endpoints = HashSet::new();
        for child in session.children(&self.service_key).await? {
            let path = child_path(&self.service_key, &child);
            let payload = session.payload(&path).await?;
            match Endpoint::from_payload(&payload) {
                Ok(endpoint) => {
                    endpoints.insert(endpoint);
                },
                Err(e) => warn!("[ZKRPC] skipping malformed endpoint record {path}: {e}"),
            }
        }
        Ok(endpoints.into_iter().collect())
    }
}
