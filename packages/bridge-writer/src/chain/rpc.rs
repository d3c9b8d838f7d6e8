use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use crate::{Error, Result};
use super::Connection;

/// 基于 JSON-RPC 的 EVM 节点连接
pub struct RpcConnection {
    client: reqwest::Client,
    endpoint: String,
}

impl RpcConnection {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| Error::ConnectionLost(e.to_string()))?;

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))?;

        if let Some(err) = result.get("error") {
            return Err(Error::Chain(format!("{} failed: {}", method, err)));
        }

        result
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Chain(format!("{} returned no result", method)))
    }

    pub async fn chain_id(&self) -> Result<u64> {
        let value = self.call("eth_chainId", serde_json::json!([])).await?;
        let raw = value
            .as_str()
            .ok_or_else(|| Error::Serialization(format!("unexpected chain id: {}", value)))?;
        u64::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[async_trait]
impl Connection for RpcConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn ensure_connected(&self) -> Result<()> {
        let chain_id = self.chain_id().await?;
        debug!(endpoint = %self.endpoint, chain_id, "Connected to destination node");
        Ok(())
    }
}
