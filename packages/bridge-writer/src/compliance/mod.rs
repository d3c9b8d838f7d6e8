//! 被监控源链消息的 KYT 合规检查
//!
//! 失败即拒绝：只有响应中 `status` 为布尔值 `true` 时消息才能继续。
//! 每条消息只请求一次，受配置的超时限制，并可被停止信号中断。

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};
use crate::{
    classifier::{bytes_at, text_at},
    config::ComplianceConfig,
    types::{ChainId, Message},
    Error, Result,
};

pub const RECIPIENT_INDEX: usize = 2;
pub const TX_HASH_INDEX: usize = 3;
pub const HANDLER_INDEX: usize = 4;
pub const SYMBOL_INDEX: usize = 5;

/// 发送给合规服务的请求体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRequest {
    pub network: String,
    pub symbol: String,
    pub user: String,
    pub tx: String,
    pub handler: String,
}

impl ComplianceRequest {
    /// 从固定的 payload 位置读取接收者、交易哈希、handler 和代币符号，
    /// 字节字段编码为带 `0x` 前缀的小写十六进制
    pub fn from_message(network: &str, message: &Message) -> Result<Self> {
        let payload = &message.payload;
        Ok(Self {
            network: network.to_string(),
            symbol: text_at(payload, SYMBOL_INDEX)?,
            user: prefixed_hex(bytes_at(payload, RECIPIENT_INDEX)?),
            tx: prefixed_hex(bytes_at(payload, TX_HASH_INDEX)?),
            handler: prefixed_hex(bytes_at(payload, HANDLER_INDEX)?),
        })
    }
}

fn prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComplianceChecker: Send + Sync {
    /// 只有服务明确放行时才返回 `Ok(())`
    async fn check(&self, request: &ComplianceRequest) -> Result<()>;
}

pub struct HttpComplianceChecker {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpComplianceChecker {
    pub fn new(config: &ComplianceConfig) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl ComplianceChecker for HttpComplianceChecker {
    async fn check(&self, request: &ComplianceRequest) -> Result<()> {
        let body = serde_json::to_vec(request).map_err(|e| {
            error!(err = %e, "Failed to encode compliance request");
            Error::Serialization(e.to_string())
        })?;

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            error!(err = %e, endpoint = %self.endpoint, "Compliance request failed");
            Error::Network(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            error!(http_status = %status, "Compliance endpoint returned an error status");
            return Err(Error::Network(format!("compliance endpoint returned {}", status)));
        }

        let bytes = response.bytes().await.map_err(|e| {
            error!(err = %e, "Failed to read compliance response");
            Error::Network(e.to_string())
        })?;
        let decoded: Map<String, Value> = serde_json::from_slice(&bytes).map_err(|e| {
            error!(err = %e, "Failed to decode compliance response");
            Error::Serialization(e.to_string())
        })?;

        let verdict = decoded.get("status");
        debug!(status = ?verdict, "Decoded compliance status");

        match verdict {
            Some(Value::Bool(true)) => Ok(()),
            other => Err(Error::ComplianceRejected(format!("status {:?}", other))),
        }
    }
}

/// 判断消息是否需要合规检查并执行检查
pub struct ComplianceGate {
    monitored_chain: ChainId,
    network: String,
    checker: Arc<dyn ComplianceChecker>,
}

impl ComplianceGate {
    pub fn new(config: &ComplianceConfig, checker: Arc<dyn ComplianceChecker>) -> Self {
        Self {
            monitored_chain: config.monitored_chain,
            network: config.network.clone(),
            checker,
        }
    }

    pub fn from_config(config: &ComplianceConfig) -> Result<Self> {
        let checker = HttpComplianceChecker::new(config)?;
        Ok(Self::new(config, Arc::new(checker)))
    }

    pub fn monitored_chain(&self) -> ChainId {
        self.monitored_chain
    }

    pub fn applies_to(&self, message: &Message) -> bool {
        message.source == self.monitored_chain
    }

    /// 检查单条消息，任何错误都意味着消息不能继续处理
    pub async fn screen(&self, message: &Message, stop: &watch::Receiver<bool>) -> Result<()> {
        let request = ComplianceRequest::from_message(&self.network, message).map_err(|e| {
            error!(err = %e, "Failed to build compliance request");
            e
        })?;
        debug!(
            network = %request.network,
            symbol = %request.symbol,
            user = %request.user,
            tx = %request.tx,
            handler = %request.handler,
            "Built compliance request"
        );

        let mut stop = stop.clone();
        if *stop.borrow() {
            error!("Stop signal set, skipping compliance check");
            return Err(Error::Cancelled);
        }

        let result = tokio::select! {
            result = self.checker.check(&request) => result,
            _ = stop_signalled(&mut stop) => Err(Error::Cancelled),
        };

        if let Err(e) = &result {
            match e {
                Error::ComplianceRejected(reason) => {
                    error!(reason = %reason, tx = %request.tx, "KYT compliance alert");
                }
                other => error!(err = %other, tx = %request.tx, "Compliance check failed"),
            }
        }
        result
    }
}

/// 停止标志变为 `true` 时返回；发送端被丢弃则永不返回
async fn stop_signalled(stop: &mut watch::Receiver<bool>) {
    loop {
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *stop.borrow() {
            return;
        }
    }
}
