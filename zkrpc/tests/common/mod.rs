// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Calculator service shared by the integration tests.

#![allow(dead_code)]

use futures::future;
use futures::prelude::*;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tarpc::serde_transport::{self, tcp};
use tarpc::server::{self, Channel, Serve};
use tarpc::tokio_serde::formats::{Bincode, Json};
use tarpc::tokio_util::codec::LengthDelimitedCodec;
use tarpc::{context, RequestName, ServerError};
use tokio::net::TcpListener;
use zkrpc::transport::{Codec, TlsAcceptor};
use zkrpc::MethodTable;

pub const SERVICE: &str = "/services/calculator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Number {
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumberPair {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CalculatorRequest {
    SquareRoot { request: Number },
    Add { request: NumberPair },
}

impl RequestName for CalculatorRequest {
    fn name(&self) -> &'static str {
        match self {
            CalculatorRequest::SquareRoot { .. } => "SquareRoot",
            CalculatorRequest::Add { .. } => "Add",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CalculatorResponse {
    SquareRoot(Number),
    Add(Number),
}

#[derive(Clone)]
pub struct CalculatorServer;

impl Serve for CalculatorServer {
    type Req = CalculatorRequest;
    type Resp = CalculatorResponse;

    async fn serve(self, _: context::Context, req: CalculatorRequest) -> Result<CalculatorResponse, ServerError> {
        Ok(match req {
            CalculatorRequest::SquareRoot { request } => CalculatorResponse::SquareRoot(Number { value: request.value.sqrt() }),
            CalculatorRequest::Add { request } => CalculatorResponse::Add(Number { value: request.x + request.y }),
        })
    }
}

pub fn methods() -> MethodTable<CalculatorRequest> {
    MethodTable::new()
        .method("SquareRoot", |request: Number| CalculatorRequest::SquareRoot { request })
        .method("Add", |request: NumberPair| CalculatorRequest::Add { request })
}

async fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    tokio::spawn(fut);
}

/// Serves the calculator in the clear on an ephemeral loopback port.
pub async fn start_server(codec: Codec) -> anyhow::Result<SocketAddr> {
    macro_rules! serve {
        ($format:expr) => {{
            let mut listener = tcp::listen(("127.0.0.1", 0), $format).await?;
            listener.config_mut().max_frame_length(usize::MAX);
            let addr = listener.local_addr();
            tokio::spawn(
                listener
                    .filter_map(|r| future::ready(r.ok()))
                    .map(server::BaseChannel::with_defaults)
                    .map(|channel| channel.execute(CalculatorServer).for_each(spawn))
                    .buffer_unordered(10)
                    .for_each(|_| async {}),
            );
            addr
        }};
    }
    Ok(match codec {
        Codec::Bincode => serve!(Bincode::default),
        Codec::Json => serve!(Json::default),
    })
}

/// Serves the calculator over TLS with bincode framing on an ephemeral loopback port.
///
/// The counter tracks accepted connections, including those whose handshake fails.
pub async fn start_tls_server(acceptor: TlsAcceptor) -> anyhow::Result<(SocketAddr, Arc<AtomicUsize>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // Failed handshakes are the client's problem to report.
                let Ok(stream) = acceptor.accept(stream).await else {
                    return;
                };
                let framed = LengthDelimitedCodec::builder().max_frame_length(usize::MAX).new_framed(stream);
                let transport = serde_transport::new(framed, Bincode::default());
                server::BaseChannel::with_defaults(transport).execute(CalculatorServer).for_each(spawn).await;
            });
        }
    });
    Ok((addr, accepted))
}
