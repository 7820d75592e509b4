//! `deskbridge runtime`: the desktop runtime client.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use deskbridge_core::{Config, Paths};
use deskbridge_runtime::{NullHost, RuntimeClient, ViewManager};

pub async fn run(url: Option<String>, client_id: Option<String>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let mut config = Config::load(&paths)?;
    if let Some(url) = url {
        config.channel.url = url;
    }
    if let Some(client_id) = client_id {
        config.channel.client_id = client_id;
    }

    // The real desktop host implements ViewHost; headless runs attach
    // nothing and pages live only inside the embedded engine.
    let views = Arc::new(ViewManager::new(
        config.engine.clone(),
        config.automation.clone(),
        Arc::new(NullHost),
    ));

    // Drain view events so the lagging-receiver path never trips, and for
    // operator visibility.
    let mut events = views.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(event = ?event, "View event");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let client = RuntimeClient::new(config.clone(), views);
    info!(
        client_id = %config.channel.client_id,
        instance_id = %client.instance_id(),
        hub = %config.channel.url,
        "Starting desktop runtime client"
    );

    let runner = tokio::spawn(client.run_loop(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");
    let _ = shutdown_tx.send(());
    let _ = runner.await;
    Ok(())
}
