//! Minimal interactive demo: connects, joins a channel, and echoes peer
//! notifications to stdout.

use anyhow::Result;
use relay_client::RelayClient;

#[tokio::main]
async fn main() -> Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:6121".to_string());
    let mut client = RelayClient::connect(addr.parse()?).await?;
    println!("connected as client {} — {}", client.client_id, client.welcome);

    client.set_name("demo").await?;
    let ack = client.join_channel("lobby", false, false).await?;
    println!(
        "joined channel {} as {}, {} existing member(s)",
        ack.channel_id,
        if ack.is_master { "master" } else { "member" },
        ack.members.len()
    );

    loop {
        let frame = client.recv_frame().await?;
        println!("frame type={} variant={} bytes={}", frame.header.msg_type, frame.header.variant, frame.payload.len());
    }
}
