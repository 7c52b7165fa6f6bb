//! Subscribes to one channel and logs every event bound on it.
//!
//! Run with:
//! ```sh
//! PUSHER_KEY=app-key PUSHER_CLUSTER=eu RUST_LOG=info,pusher_client=debug \
//!     cargo run --example subscribe -- orders item_sold
//! ```

use std::time::Duration;

use pusher_client::pusher::{Connection, Endpoint};
use pusher_client::ws::config::Config;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let key = std::env::var("PUSHER_KEY")?;
    let mut args = std::env::args().skip(1);
    let channel_name = args.next().unwrap_or_else(|| "test-channel".to_owned());
    let event_name = args.next().unwrap_or_else(|| "test-event".to_owned());

    let endpoint = Endpoint::builder()
        .maybe_cluster(std::env::var("PUSHER_CLUSTER").ok())
        .encrypted(true)
        .build();
    let config = Config::builder()
        .maybe_proxy(std::env::var("HTTPS_PROXY").ok())
        .build();

    let connection = Connection::connect(&key, &endpoint, config).await?;

    let mut state = connection.state_receiver();
    match timeout(Duration::from_secs(10), state.wait_for(|s| s.is_connected())).await {
        Ok(Ok(_)) => info!(socket_id = ?connection.socket_id(), "Connected"),
        _ => warn!("No connection_established from broker yet"),
    }

    let channel = connection.channel(&channel_name);
    let bound_channel = channel_name.clone();
    channel.bind(&event_name, move |data| {
        info!(channel = %bound_channel, %data, "Event received");
    });
    info!(channel = %channel_name, event = %event_name, "Listening for five minutes");

    let mut errors = connection.errors();
    let watch_errors = tokio::spawn(async move {
        while let Ok(error) = errors.recv().await {
            warn!(%error, "Runtime error");
        }
    });

    tokio::time::sleep(Duration::from_secs(300)).await;

    connection.disconnect().await?;
    watch_errors.abort();

    Ok(())
}
