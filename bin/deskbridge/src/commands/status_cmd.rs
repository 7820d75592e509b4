//! `deskbridge status`: query a running hub.

use deskbridge_core::{Config, Paths};
use serde_json::Value;

pub async fn run(hub_url: Option<String>) -> anyhow::Result<()> {
    let config = Config::load(&Paths::new()).unwrap_or_default();
    let base = hub_url
        .unwrap_or_else(|| format!("http://{}:{}", config.hub.host, config.hub.port));

    let client = reqwest::Client::new();
    let mut health_req = client.get(format!("{}/v1/health", base));
    if !config.hub.api_token.is_empty() {
        health_req = health_req.bearer_auth(&config.hub.api_token);
    }
    let health: Value = health_req.send().await?.json().await?;
    println!("Hub:       {}", base);
    println!(
        "Status:    {} (v{})",
        health["status"].as_str().unwrap_or("?"),
        health["version"].as_str().unwrap_or("?")
    );

    let mut instances_req = client.get(format!("{}/v1/instances", base));
    if !config.hub.api_token.is_empty() {
        instances_req = instances_req.bearer_auth(&config.hub.api_token);
    }
    let instances: Value = instances_req.send().await?.json().await?;
    let list = instances.as_array().cloned().unwrap_or_default();
    println!("Instances: {}", list.len());
    for instance in list {
        println!(
            "  - {} ({}) connected {}",
            instance["clientId"].as_str().unwrap_or("?"),
            instance["version"].as_str().unwrap_or("?"),
            instance["connectedAt"].as_str().unwrap_or("?"),
        );
    }
    Ok(())
}
