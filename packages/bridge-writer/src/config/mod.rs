use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::{types::ChainId, Error};

const DEFAULT_NETWORK_LABEL: &str = "Ethereum";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const MAX_TIMEOUT_SECS: u64 = 60;

/// 目标链配置，提案提交到该链
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub id: ChainId,
    pub name: String,
    pub endpoint: String,
    pub bridge_address: String,
    pub relayer_address: String,
}

/// 合规检查配置，只对来自被监控源链的消息生效
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ComplianceConfig {
    pub monitored_chain: ChainId,
    #[serde(default = "default_network")]
    pub network: String,
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_network() -> String {
    DEFAULT_NETWORK_LABEL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ComplianceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(Error::Config(format!("Invalid compliance endpoint: {}", self.endpoint)));
        }
        if self.network.is_empty() {
            return Err(Error::Config("Compliance network label must not be empty".to_string()));
        }
        if self.timeout_secs == 0 || self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "Compliance timeout must be between 1 and {} seconds",
                MAX_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub chain: ChainConfig,
    pub compliance: ComplianceConfig,
}

impl Config {
    /// 加载配置文件，`.toml` 后缀按 TOML 解析，其余按 JSON 解析
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
            _ => serde_json::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
        };

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chain.name.is_empty() {
            return Err(Error::Config("Chain name must not be empty".to_string()));
        }
        if self.chain.endpoint.is_empty() {
            return Err(Error::Config("Chain endpoint must not be empty".to_string()));
        }
        // 验证合约与中继地址
        for (field, value) in [
            ("bridge_address", &self.chain.bridge_address),
            ("relayer_address", &self.chain.relayer_address),
        ] {
            let raw = value.strip_prefix("0x").unwrap_or(value);
            match hex::decode(raw) {
                Ok(bytes) if bytes.len() == 20 => {}
                _ => return Err(Error::Config(format!("Invalid {}: {}", field, value))),
            }
        }

        self.compliance.validate()
    }
}
