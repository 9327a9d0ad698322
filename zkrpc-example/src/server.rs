// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use futures::prelude::*;
use service::{init_tracing, registry_options, Calculator, CalculatorRequest, CalculatorResponse, CalculatorServer, CLOSE_GRACE, SERVICE_KEY};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tarpc::server::{BaseChannel, Channel};
use tarpc::{serde_transport, ClientMessage, Response, Transport};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use zkrpc::coordination::zookeeper::ZkSession;
use zkrpc::tokio_serde::formats::{Bincode, Json};
use zkrpc::tokio_util::codec::LengthDelimitedCodec;
use zkrpc::transport::{Codec, ServerIdentity, TlsAcceptor};
use zkrpc::{ClientConfig, Endpoint};

#[derive(Parser)]
struct Flags {
    /// Sets the port number to listen on.
    #[clap(long, env = "LISTEN_PORT", default_value_t = 50051)]
    port: u16,
    /// Sets the ZooKeeper ensemble to register with.
    #[clap(long, env = "ZK_HOST", default_value = ClientConfig::DEFAULT_COORDINATION_ENDPOINT)]
    zk_host: String,
    /// Sets the host name published for clients to dial.
    #[clap(long, env = "ADVERTISE_HOST", default_value = "localhost")]
    advertise_host: String,
    /// PEM private key; serves in the clear unless given with `--cert-file`.
    #[clap(long, requires = "cert_file")]
    key_file: Option<PathBuf>,
    /// PEM certificate chain, leaf first.
    #[clap(long, requires = "key_file")]
    cert_file: Option<PathBuf>,
    /// Transport serde codec, `bincode` or `json`.
    #[clap(long, default_value = "bincode")]
    codec: Codec,
    /// Calls served at once across all connections; further calls queue.
    #[clap(long, default_value_t = 10)]
    max_workers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Calculator Server")?;

    let tls = match (&flags.key_file, &flags.cert_file) {
        (Some(key), Some(cert)) => Some(ServerIdentity::new(key, cert).acceptor()?),
        _ => {
            warn!("[ZKRPC] no key and certificate given, serving in the clear");
            None
        },
    };

    let port = flags.port;
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)).await?;
    info!("[ZKRPC] Starting server. Listening on port {port}.");

    let session = ZkSession::start(registry_options(flags.zk_host)).await?;
    let node = session.register(SERVICE_KEY, &Endpoint::new(flags.advertise_host, port)).await?;
    info!("[ZKRPC] registered as {node}");

    let workers = Arc::new(Semaphore::new(flags.max_workers));
    let codec = flags.codec;
    let accept = async {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("[ZKRPC] accept failed: {e}");
                    continue;
                },
            };
            tokio::spawn(serve_connection(stream, peer, tls.clone(), codec, workers.clone()));
        }
    };
    tokio::select! {
        _ = accept => {},
        _ = tokio::signal::ctrl_c() => info!("[ZKRPC] shutting down"),
    }
    session.shutdown(CLOSE_GRACE).await;
    Ok(())
}

async fn serve_connection(stream: tokio::net::TcpStream, peer: SocketAddr, tls: Option<TlsAcceptor>, codec: Codec, workers: Arc<Semaphore>) {
    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_io(stream, codec, workers).await,
            Err(e) => warn!("[ZKRPC] TLS handshake with {peer} failed: {e}"),
        },
        None => serve_io(stream, codec, workers).await,
    }
}

async fn serve_io<Io>(io: Io, codec: Codec, workers: Arc<Semaphore>)
where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = LengthDelimitedCodec::builder().max_frame_length(usize::MAX).new_framed(io);
    match codec {
        Codec::Bincode => execute(serde_transport::new(framed, Bincode::default()), workers).await,
        Codec::Json => execute(serde_transport::new(framed, Json::default()), workers).await,
    }
}

/// Runs every call of one connection on the shared worker pool.
async fn execute<T>(transport: T, workers: Arc<Semaphore>)
where
    T: Transport<Response<CalculatorResponse>, ClientMessage<CalculatorRequest>> + Send + 'static,
{
    BaseChannel::with_defaults(transport)
        .execute(CalculatorServer.serve())
        .for_each(|response| {
            let workers = workers.clone();
            async move {
                let Ok(permit) = workers.acquire_owned().await else {
                    return;
                };
                tokio::spawn(async move {
                    response.await;
                    drop(permit);
                });
            }
        })
        .await;
}
