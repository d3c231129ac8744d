//! alertdesk-watch - follow the console's realtime feed from a terminal.
//!
//! Usage: `alertdesk-watch [TYPE ...]`
//!
//! Prints every message of the given types (default: alerts, incidents and
//! feedback) as one JSON line. The credential comes from `ALERTDESK_TOKEN`,
//! falling back to the persisted console session.

use alertdesk_client::{
    handler, kinds, logging, ConnectionManager, RealtimeConfig, SessionFile, StaticToken,
};
use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("alertdesk_client=info");

    let config = RealtimeConfig::from_env().context("invalid realtime configuration")?;

    let mut types: Vec<String> = std::env::args().skip(1).collect();
    if types.is_empty() {
        types = kinds::DEFAULT_WATCH.iter().map(|s| s.to_string()).collect();
    }

    let manager = match std::env::var("ALERTDESK_TOKEN") {
        Ok(token) => ConnectionManager::new(config, StaticToken::new(token))?,
        Err(_) => {
            let sessions = SessionFile::default_location()
                .context("no ALERTDESK_TOKEN set and no config directory for a stored session")?;
            ConnectionManager::new(config, sessions)?
        }
    };

    let _ = manager.on_state_change(|state| tracing::info!("connection {}", state));
    let _ = manager.on_error(|e| tracing::warn!(kind = %e.kind(), "{}", e));

    for kind in &types {
        let label = kind.clone();
        manager.subscribe(
            kind.as_str(),
            handler(move |data| {
                println!("{}", serde_json::json!({ "type": label, "data": data }));
            }),
        );
    }

    tracing::info!(
        "watching {} on {}",
        types.join(", "),
        manager.config().socket_url()
    );
    manager.connect();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    manager.disconnect();
    Ok(())
}
