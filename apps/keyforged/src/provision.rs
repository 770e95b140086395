use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use keyforge_core::collaborators::ServerProvisioner;
use keyforge_db::models::Server;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

/// Pushes issued keys to the node agent running next to each VPN server.
pub struct HttpProvisioner {
    client: Client,
}

impl HttpProvisioner {
    /// Fails rather than falling back to a client without the request
    /// and connect timeouts.
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("building provisioning HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ServerProvisioner for HttpProvisioner {
    async fn configure(&self, server: &Server, key: &str) -> anyhow::Result<()> {
        let url = format!("http://{}:{}/add-user", server.address, server.port);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "key": key }))
            .send()
            .await
            .with_context(|| format!("agent at {url} unreachable"))?;

        if !response.status().is_success() {
            anyhow::bail!("agent at {url} answered {}", response.status());
        }
        debug!(server_id = server.id, address = %server.address, "key provisioned");
        Ok(())
    }
}
