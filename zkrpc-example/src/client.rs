// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use rand::Rng;
use serde_json::json;
use service::{calculator_methods, init_tracing, CalculatorRequest, CalculatorResponse, SERVICE_KEY};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use zkrpc::transport::{Codec, TlsConfig};
use zkrpc::client::TarpcConnector;
use zkrpc::{Client, ClientConfig};

#[derive(Parser)]
struct Flags {
    /// Sets the ZooKeeper ensemble to discover servers through.
    #[clap(long, env = "ZK_HOST", default_value = ClientConfig::DEFAULT_COORDINATION_ENDPOINT)]
    zk_host: String,
    /// Sets the service node whose children are the live servers.
    #[clap(long, default_value = SERVICE_KEY)]
    service_key: String,
    /// PEM root CA to trust; connects in the clear if absent.
    #[clap(long)]
    ca_file: Option<PathBuf>,
    /// Name to verify server certificates against, instead of the published host.
    #[clap(long, requires = "ca_file")]
    server_name: Option<String>,
    /// Transport serde codec, `bincode` or `json`.
    #[clap(long, default_value = "bincode")]
    codec: Codec,
    /// Number of calls to make.
    #[clap(long, default_value_t = 100_000)]
    calls: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Calculator Client")?;

    let mut config = ClientConfig::new(flags.service_key).with_coordination_endpoint(flags.zk_host).with_transport_codec(flags.codec);
    if let Some(ca_file) = flags.ca_file {
        let mut tls = TlsConfig::new(ca_file);
        if let Some(server_name) = flags.server_name {
            tls = tls.with_server_name(server_name);
        }
        config = config.with_tls(tls);
    }
    let client: Client<_, TarpcConnector<CalculatorRequest, CalculatorResponse>> = Client::connect(config, calculator_methods()).await?;

    let start = Instant::now();
    let mut total = 0.0;
    for call in 0..flags.calls {
        if call % 1000 == 0 {
            info!("On call #{call}");
        }
        // ThreadRng must not live across the await.
        let (method, args) = {
            let mut rng = rand::thread_rng();
            if rng.gen_bool(0.5) {
                ("SquareRoot", json!({ "value": rng.gen_range(1..=100_000) }))
            } else {
                ("Add", json!({ "x": 1, "y": rng.gen_range(1..=100_000) }))
            }
        };
        total += client.call(method, args).await?.value();
    }
    let elapsed = start.elapsed().as_secs_f64();
    info!("Total: {total}");
    info!("{:.1} calls per sec", flags.calls as f64 / elapsed);

    client.close();
    Ok(())
}
