use anyhow::Context;
use deribit_rpc::{DeribitBuilder, DeribitConfig, SessionConfig, WsMessage};
use std::time::Duration;

fn load_config() -> DeribitConfig {
    #[cfg(feature = "env-file")]
    let loaded = DeribitConfig::from_env_file("DERIBIT");
    #[cfg(not(feature = "env-file"))]
    let loaded = DeribitConfig::from_env("DERIBIT");

    loaded.unwrap_or_else(|e| {
        tracing::info!("{}; using public testnet access", e);
        DeribitConfig::read_only().testnet(true)
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config();
    let session = if config.has_credentials() {
        SessionConfig::private().with_token_refresh(true)
    } else {
        SessionConfig::default()
    };

    let mut channels: Vec<String> = std::env::args().skip(1).collect();
    if channels.is_empty() {
        channels.push("ticker.BTC-PERPETUAL.100ms".to_string());
    }

    let builder = DeribitBuilder::new(config).with_session_config(session);
    let client = builder.build_ws();

    let mut messages = client
        .connect(&builder.websocket_url())
        .await
        .context("failed to open WebSocket session")?;
    client
        .subscribe(&channels)
        .await
        .context("failed to subscribe")?;
    client.start_keepalive(Duration::from_secs(30))?;

    println!("Session {} ({}), streaming {:?}", client.state(), client.scope(), channels);

    loop {
        tokio::select! {
            message = messages.recv() => match message {
                Some(WsMessage::Subscription { channel, data }) => println!("{}: {}", channel, data),
                Some(WsMessage::SessionLost { attempts, reason }) => {
                    anyhow::bail!("session lost after {} attempts: {}", attempts, reason);
                }
                Some(other) => println!("{:?}", other),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.close().await;
    Ok(())
}
