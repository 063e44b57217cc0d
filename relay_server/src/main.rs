//! Relay server binary.

use std::io::BufRead;

use anyhow::Result;
use relay_core::RelayConfig;
use relay_server::Runtime;
use tokio::sync::mpsc;

struct Args {
    addr: Option<String>,
    welcome: Option<String>,
    ping_interval_ms: Option<u64>,
}

fn parse_args() -> Args {
    let mut args = Args {
        addr: None,
        welcome: None,
        ping_interval_ms: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--addr" => args.addr = it.next(),
            "--welcome" => args.welcome = it.next(),
            "--ping-interval-ms" => {
                args.ping_interval_ms = it.next().and_then(|s| s.parse().ok());
            }
            other => eprintln!("unrecognized argument: {other}"),
        }
    }
    args
}

fn spawn_console_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = parse_args();
    let mut config = RelayConfig::default();
    if let Some(addr) = cli.addr {
        config.bind_addr = addr;
    }
    if let Some(welcome) = cli.welcome {
        config.welcome_message = welcome;
    }
    if let Some(ms) = cli.ping_interval_ms {
        config.ping_interval_ms = ms;
    }

    let mut runtime = Runtime::bind(config).await?;
    tracing::info!(addr = %runtime.local_addr()?, "relay server listening");
    runtime.attach_console(spawn_console_reader());

    runtime.run().await
}
