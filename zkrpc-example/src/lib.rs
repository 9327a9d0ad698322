// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! The calculator service shared by the example server and client.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zkrpc::coordination::zookeeper::SessionOptions;
use zkrpc::context::Context;
use zkrpc::server::Serve;
use zkrpc::{MethodTable, RequestName, ServerError};

/// Node under which calculator servers publish themselves.
pub const SERVICE_KEY: &str = "/services/calculator";

/// How long a stopping server waits for ZooKeeper to acknowledge its close.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Session options for a server publishing itself under [`SERVICE_KEY`].
/// Creating nodes needs a writable server.
pub fn registry_options(zk_host: impl Into<String>) -> SessionOptions {
    SessionOptions::new(zk_host.into()).with_readonly(false)
}

/// A single operand or result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Number {
    pub value: f64,
}

/// Operands of a binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumberPair {
    pub x: f64,
    pub y: f64,
}

/// Arithmetic over the wire.
#[allow(async_fn_in_trait)]
pub trait Calculator: Sized + Clone {
    /// Returns the square root of `request.value`.
    async fn square_root(self, ctx: Context, request: Number) -> Number;
    /// Returns `request.x + request.y`.
    async fn add(self, ctx: Context, request: NumberPair) -> Number;

    /// Returns a serving function to use with
    /// [`Channel::execute`](zkrpc::server::Channel::execute).
    fn serve(self) -> ServeCalculator<Self> {
        ServeCalculator { calculator: self }
    }
}

/// The request sent over the wire from the client to the server.
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

/// The response sent over the wire from the server to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CalculatorResponse {
    SquareRoot(Number),
    Add(Number),
}

/// A serving function to use with [`Channel::execute`](zkrpc::server::Channel::execute).
#[derive(Clone, Debug)]
pub struct ServeCalculator<S> {
    calculator: S,
}

impl<S> Serve for ServeCalculator<S>
where
    S: Calculator,
{
    type Req = CalculatorRequest;
    type Resp = CalculatorResponse;

    async fn serve(self, ctx: Context, req: CalculatorRequest) -> Result<CalculatorResponse, ServerError> {
        match req {
            CalculatorRequest::SquareRoot { request } => Ok(CalculatorResponse::SquareRoot(Calculator::square_root(self.calculator, ctx, request).await)),
            CalculatorRequest::Add { request } => Ok(CalculatorResponse::Add(Calculator::add(self.calculator, ctx, request).await)),
        }
    }
}

/// The server-side implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct CalculatorServer;

impl Calculator for CalculatorServer {
    async fn square_root(self, _: Context, request: Number) -> Number {
        Number { value: request.value.sqrt() }
    }

    async fn add(self, _: Context, request: NumberPair) -> Number {
        Number { value: request.x + request.y }
    }
}

impl CalculatorResponse {
    /// The number carried by any response.
    pub fn value(&self) -> f64 {
        match self {
            CalculatorResponse::SquareRoot(n) | CalculatorResponse::Add(n) => n.value,
        }
    }
}

/// The methods a calculator client dispatches by name.
pub fn calculator_methods() -> MethodTable<CalculatorRequest> {
    MethodTable::new()
        .method("SquareRoot", |request: Number| CalculatorRequest::SquareRoot { request })
        .method("Add", |request: NumberPair| CalculatorRequest::Add { request })
}

/// Installs a fmt subscriber filtered by `RUST_LOG`, `info` by default.
pub fn init_tracing(service_name: &'static str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!("[ZKRPC] {service_name} started");
    Ok(())
}
