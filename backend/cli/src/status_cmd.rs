//! CLI Status Command
//!
//! Asks a running server for its backend and model status.

use std::time::Duration;

use anyhow::{Context, Result};

use picscribe_config::ServerConfig;

pub async fn run(server: &ServerConfig) -> Result<()> {
    let url = status_url(server);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    match client.get(&url).send().await {
        Ok(resp) => {
            let body: serde_json::Value = resp
                .json()
                .await
                .context("Server returned a non-JSON status")?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Err(_) => {
            println!("Picscribe is not running at {url}");
        }
    }
    Ok(())
}

/// Wildcard bind addresses are reached through loopback.
fn status_url(server: &ServerConfig) -> String {
    let host = match server.bind_address.as_str() {
        "" | "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        host => host,
    };
    format!("http://{host}:{}/status", server.port)
}
