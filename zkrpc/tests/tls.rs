// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

mod common;

use assert_matches::assert_matches;
use common::{methods, start_tls_server, CalculatorRequest, CalculatorResponse, Number, SERVICE};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zkrpc::client::TarpcConnector;
use zkrpc::coordination::MemoryCoordinator;
use zkrpc::transport::{ServerIdentity, TlsConfig};
use zkrpc::{Client, ClientConfig, ClientError, Endpoint};

type CalculatorClient = Client<MemoryCoordinator, TarpcConnector<CalculatorRequest, CalculatorResponse>>;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

async fn serve() -> anyhow::Result<(SocketAddr, Arc<AtomicUsize>)> {
    let acceptor = ServerIdentity::new(fixture("server.key"), fixture("server-chain.pem")).acceptor()?;
    start_tls_server(acceptor).await
}

fn client(host: &str, port: u16, tls: TlsConfig) -> anyhow::Result<(MemoryCoordinator, CalculatorClient)> {
    let tree = MemoryCoordinator::new();
    tree.register(SERVICE, &Endpoint::new(host, port));
    let config = ClientConfig::new(SERVICE).with_tls(tls);
    let connector = TarpcConnector::new(&config)?;
    let client = Client::new(config, tree.clone(), connector, methods());
    Ok((tree, client))
}

#[tokio::test]
async fn test_calls_over_tls() -> anyhow::Result<()> {
    let (addr, accepted) = serve().await?;
    let (_tree, client) = client("localhost", addr.port(), TlsConfig::new(fixture("ca.pem")))?;

    let sum = client.call("Add", json!({"x": 1, "y": 2})).await?;
    assert_matches!(sum, CalculatorResponse::Add(Number { value }) if value == 3.0);
    let root = client.call("SquareRoot", json!({"value": 9})).await?;
    assert_matches!(root, CalculatorResponse::SquareRoot(Number { value }) if value == 3.0);

    // Both calls share one connection.
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    client.close();
    Ok(())
}

#[tokio::test]
async fn test_verifies_against_server_name() -> anyhow::Result<()> {
    let (addr, _) = serve().await?;
    let tls = TlsConfig::new(fixture("ca.pem")).with_server_name("calculator.internal");
    let (_tree, client) = client("127.0.0.1", addr.port(), tls)?;

    let sum = client.call("Add", json!({"x": 0.5, "y": 0.5})).await?;
    assert_matches!(sum, CalculatorResponse::Add(Number { value }) if value == 1.0);
    assert_eq!(client.endpoint(), Some(Endpoint::new("127.0.0.1", addr.port())));
    Ok(())
}

#[tokio::test]
async fn test_mismatched_server_name_fails_handshake() -> anyhow::Result<()> {
    let (addr, accepted) = serve().await?;
    let tls = TlsConfig::new(fixture("ca.pem")).with_server_name("billing.internal");
    let (_tree, client) = client("127.0.0.1", addr.port(), tls)?;

    let call = client.call("Add", json!({"x": 1, "y": 1}));
    let result = tokio::time::timeout(Duration::from_secs(5), call).await?;
    assert_matches!(result, Err(ClientError::Handshake { .. }));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_untrusted_server_is_not_retried() -> anyhow::Result<()> {
    let (addr, accepted) = serve().await?;
    let (_tree, client) = client("localhost", addr.port(), TlsConfig::new(fixture("untrusted-ca.pem")))?;

    let call = client.call("Add", json!({"x": 1, "y": 1}));
    let result = tokio::time::timeout(Duration::from_secs(5), call).await?;
    assert_matches!(result, Err(ClientError::Handshake { ref endpoint, .. }) if endpoint.port == addr.port());
    assert!(!result.err().is_some_and(|e| e.is_transient()));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
    assert!(client.endpoint().is_none());

    // Nothing was left half-built; the next call dials afresh.
    assert_matches!(client.call("Add", json!({"x": 1, "y": 1})).await, Err(ClientError::Handshake { .. }));
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    Ok(())
}
