use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument};
use crate::{
    chain::{BridgeContract, Connection},
    classifier::classify,
    compliance::{ComplianceChecker, ComplianceGate},
    config::Config,
    metrics::WriterMetrics,
    proposal::{dispatch, ContractProposer, ProposalHandler},
    types::{Address, Message},
    Error, Result,
};

/// 目标链消息处理器：按需执行 KYT 检查，解码 payload，再分发给提案处理器
///
/// 不保存任何单条消息的状态，绑定依赖后可放在 `Arc` 中并发处理多条消息
pub struct Writer {
    cfg: Config,
    conn: Arc<dyn Connection>,
    relayer: Address,
    gate: ComplianceGate,
    proposals: Option<Arc<dyn ProposalHandler>>,
    stop: watch::Receiver<bool>,
    sys_err: mpsc::UnboundedSender<Error>,
    metrics: Option<Arc<WriterMetrics>>,
}

impl Writer {
    pub fn new(
        conn: Arc<dyn Connection>,
        cfg: &Config,
        stop: watch::Receiver<bool>,
        sys_err: mpsc::UnboundedSender<Error>,
        metrics: Option<Arc<WriterMetrics>>,
    ) -> Result<Self> {
        cfg.validate()?;
        let relayer = parse_address(&cfg.chain.relayer_address)?;
        let gate = ComplianceGate::from_config(&cfg.compliance)?;

        Ok(Self {
            cfg: cfg.clone(),
            conn,
            relayer,
            gate,
            proposals: None,
            stop,
            sys_err,
            metrics,
        })
    }

    pub async fn start(&self) -> Result<()> {
        debug!(chain = %self.cfg.chain.name, endpoint = %self.conn.endpoint(), "Starting writer...");
        if self.proposals.is_none() {
            return Err(Error::Config("No bridge contract bound to writer".to_string()));
        }
        self.conn.ensure_connected().await
    }

    /// 绑定目标链桥合约，之后的提案都通过它提交
    pub fn set_contract(&mut self, contract: Arc<dyn BridgeContract>) {
        self.proposals = Some(Arc::new(ContractProposer::new(
            contract,
            self.relayer,
            self.sys_err.clone(),
            self.metrics.clone(),
        )));
    }

    pub fn set_proposal_handler(&mut self, handler: Arc<dyn ProposalHandler>) {
        self.proposals = Some(handler);
    }

    pub fn set_compliance_checker(&mut self, checker: Arc<dyn ComplianceChecker>) {
        self.gate = ComplianceGate::new(&self.cfg.compliance, checker);
    }

    /// 根据消息类型和源链处理消息
    ///
    /// 返回值表示是否提交了提案，主要用于测试；失败通过日志报告
    #[instrument(skip_all, fields(chain = %self.cfg.chain.name))]
    pub async fn resolve_message(&self, m: &Message) -> bool {
        info!(
            msg_type = %m.message_type,
            src = %m.source,
            dst = %m.destination,
            nonce = %m.deposit_nonce,
            r_id = %m.resource_id,
            "Attempting to resolve message"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_resolved();
        }

        // 只检查来自被监控链的消息
        if self.gate.applies_to(m) {
            if let Err(e) = self.gate.screen(m, &self.stop).await {
                if let (Error::ComplianceRejected(_), Some(metrics)) = (&e, &self.metrics) {
                    metrics.record_compliance_rejection();
                }
                error!(err = %e, src = %m.source, nonce = %m.deposit_nonce, "Message failed compliance check");
                return false;
            }
            debug!(nonce = %m.deposit_nonce, "Message cleared compliance check");
        }

        let transfer = match classify(m) {
            Ok(transfer) => transfer,
            Err(Error::UnknownMessageType(message_type)) => {
                error!(msg_type = %message_type, "Unknown message type received");
                return false;
            }
            Err(e) => {
                error!(err = %e, nonce = %m.deposit_nonce, "Failed to decode message payload");
                return false;
            }
        };

        let Some(handler) = &self.proposals else {
            error!(nonce = %m.deposit_nonce, "No proposal handler attached, dropping message");
            return false;
        };
        dispatch(handler.as_ref(), m, &transfer).await
    }
}

fn parse_address(value: &str) -> Result<Address> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(raw).map_err(|e| Error::Config(format!("Invalid address {}: {}", value, e)))?;
    Address::from_slice(&bytes).ok_or_else(|| Error::Config(format!("Invalid address length: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockBridgeContract, MockConnection};
    use crate::compliance::MockComplianceChecker;
    use crate::config::{ChainConfig, ComplianceConfig};
    use crate::proposal::{MockProposalHandler, ProposalStatus};
    use crate::types::{ChainId, DepositNonce, MessageType, PayloadField, ResourceId, TxHash};
    use mockito::Matcher;
    use serde_json::json;

    fn config(endpoint: &str) -> Config {
        Config {
            chain: ChainConfig {
                id: ChainId(2),
                name: "destination".to_string(),
                endpoint: "http://localhost:8545".to_string(),
                bridge_address: format!("0x{}", "62".repeat(20)),
                relayer_address: format!("0x{}", "99".repeat(20)),
            },
            compliance: ComplianceConfig {
                monitored_chain: ChainId(1),
                network: "Ethereum".to_string(),
                endpoint: endpoint.to_string(),
                timeout_secs: 2,
                auth_token: None,
            },
        }
    }

    fn fungible_from(source: u8) -> Message {
        Message::fungible_transfer(
            ChainId(source),
            ChainId(2),
            DepositNonce(11),
            ResourceId([5u8; 32]),
            Address([0x01; 20]),
            &[0x03, 0xe8],
            Address([0xab; 20]),
            TxHash([0xcd; 32]),
            Address([0xef; 20]),
            "USDC",
        )
    }

    fn kyt_body() -> serde_json::Value {
        json!({
            "network": "Ethereum",
            "symbol": "USDC",
            "user": format!("0x{}", "ab".repeat(20)),
            "tx": format!("0x{}", "cd".repeat(32)),
            "handler": format!("0x{}", "ef".repeat(20)),
        })
    }

    fn writer(endpoint: &str, handler: MockProposalHandler) -> (Writer, Arc<WriterMetrics>) {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (sys_tx, _sys_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(WriterMetrics::new());
        let mut writer = Writer::new(
            Arc::new(MockConnection::new()),
            &config(endpoint),
            stop_rx,
            sys_tx,
            Some(metrics.clone()),
        )
        .unwrap();
        writer.set_proposal_handler(Arc::new(handler));
        (writer, metrics)
    }

    async fn kyt_server(status: usize, body: &str, hits: usize) -> (mockito::ServerGuard, mockito::Mock) {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/kyt-status")
            .match_body(Matcher::Json(kyt_body()))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await;
        (server, mock)
    }

    #[tokio::test]
    async fn test_monitored_message_cleared_and_dispatched() {
        let (server, mock) = kyt_server(200, r#"{"status": true}"#, 1).await;
        let expected = fungible_from(1);

        let mut handler = MockProposalHandler::new();
        let sent = expected.clone();
        handler
            .expect_fungible()
            .withf(move |m, t| *m == sent && t.symbol == "USDC")
            .times(1)
            .returning(|_, _| true);
        handler.expect_non_fungible().never();
        handler.expect_generic().never();

        let (writer, metrics) = writer(&format!("{}/kyt-status", server.url()), handler);
        assert!(writer.resolve_message(&expected).await);
        mock.assert_async().await;
        assert_eq!(metrics.snapshot().messages_resolved, 1);
    }

    #[tokio::test]
    async fn test_monitored_message_rejected() {
        let (server, mock) = kyt_server(200, r#"{"status": false}"#, 1).await;

        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().never();

        let (writer, metrics) = writer(&format!("{}/kyt-status", server.url()), handler);
        assert!(!writer.resolve_message(&fungible_from(1)).await);
        mock.assert_async().await;
        assert_eq!(metrics.snapshot().compliance_rejections, 1);
    }

    #[tokio::test]
    async fn test_compliance_failures_stop_before_dispatch() {
        for (status, body) in [(200, "{}"), (200, "<html>"), (503, r#"{"status": true}"#)] {
            let (server, mock) = kyt_server(status, body, 1).await;

            let mut handler = MockProposalHandler::new();
            handler.expect_fungible().never();

            let (writer, _) = writer(&format!("{}/kyt-status", server.url()), handler);
            assert!(!writer.resolve_message(&fungible_from(1)).await, "{} {}", status, body);
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_unreachable_compliance_endpoint_fails_closed() {
        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().never();

        let (writer, _) = writer("http://127.0.0.1:1/kyt-status", handler);
        assert!(!writer.resolve_message(&fungible_from(1)).await);
    }

    #[tokio::test]
    async fn test_unmonitored_source_skips_compliance() {
        let (server, mock) = kyt_server(200, r#"{"status": true}"#, 0).await;

        let fungible = fungible_from(2);
        let non_fungible = Message::new(
            MessageType::NonFungibleTransfer,
            ChainId(2),
            ChainId(1),
            DepositNonce(12),
            ResourceId([6u8; 32]),
            vec![vec![0x01u8].into(), vec![0xbbu8; 20].into(), Vec::<u8>::new().into()],
        );
        let generic = Message::new(
            MessageType::GenericTransfer,
            ChainId(2),
            ChainId(1),
            DepositNonce(13),
            ResourceId([7u8; 32]),
            vec![vec![0xdeu8, 0xad].into()],
        );

        let mut handler = MockProposalHandler::new();
        let (f, n, g) = (fungible.clone(), non_fungible.clone(), generic.clone());
        handler.expect_fungible().withf(move |m, _| *m == f).times(1).returning(|_, _| true);
        handler.expect_non_fungible().withf(move |m, _| *m == n).times(1).returning(|_, _| true);
        handler.expect_generic().withf(move |m, _| *m == g).times(1).returning(|_, _| false);

        let (writer, _) = writer(&format!("{}/kyt-status", server.url()), handler);
        assert!(writer.resolve_message(&fungible).await);
        assert!(writer.resolve_message(&non_fungible).await);
        assert!(!writer.resolve_message(&generic).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().never();
        handler.expect_non_fungible().never();
        handler.expect_generic().never();

        let (writer, _) = writer("https://unused/kyt-status", handler);
        let mut message = fungible_from(2);
        message.message_type = MessageType::Unknown(99);
        assert!(!writer.resolve_message(&message).await);
    }

    #[tokio::test]
    async fn test_unknown_type_from_monitored_source_is_screened_then_rejected() {
        let (server, mock) = kyt_server(200, r#"{"status": true}"#, 1).await;

        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().never();

        let (writer, _) = writer(&format!("{}/kyt-status", server.url()), handler);
        let mut message = fungible_from(1);
        message.message_type = MessageType::Unknown(99);
        assert!(!writer.resolve_message(&message).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_payload_is_reported() {
        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().never();

        let (writer, _) = writer("https://unused/kyt-status", handler);
        let mut message = fungible_from(2);
        message.payload[1] = PayloadField::Text("one thousand".to_string());
        assert!(!writer.resolve_message(&message).await);

        message.payload.clear();
        assert!(!writer.resolve_message(&message).await);
    }

    #[tokio::test]
    async fn test_resolving_twice_gives_same_decision() {
        let (server, mock) = kyt_server(200, r#"{"status": true}"#, 2).await;

        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().times(2).returning(|_, _| true);

        let (writer, _) = writer(&format!("{}/kyt-status", server.url()), handler);
        let message = fungible_from(1);
        assert!(writer.resolve_message(&message).await);
        assert!(writer.resolve_message(&message).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_without_handler() {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (sys_tx, _sys_rx) = mpsc::unbounded_channel();
        let mut conn = MockConnection::new();
        conn.expect_endpoint().return_const("http://localhost:8545".to_string());
        conn.expect_ensure_connected().never();

        let writer = Writer::new(Arc::new(conn), &config("https://unused"), stop_rx, sys_tx, None).unwrap();
        assert!(matches!(writer.start().await, Err(Error::Config(_))));
        assert!(!writer.resolve_message(&fungible_from(2)).await);
    }

    #[tokio::test]
    async fn test_set_contract_submits_votes() {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let (sys_tx, _sys_rx) = mpsc::unbounded_channel();
        let mut conn = MockConnection::new();
        conn.expect_endpoint().return_const("http://localhost:8545".to_string());
        conn.expect_ensure_connected().times(1).returning(|| Ok(()));

        let mut contract = MockBridgeContract::new();
        contract.expect_resource_handler().returning(|_| Ok(Address([0xef; 20])));
        contract.expect_proposal_data_hash().returning(|_, _| [1u8; 32]);
        contract
            .expect_proposal_status()
            .returning(|_, _, _| Ok(ProposalStatus::Inactive));
        contract
            .expect_has_voted()
            .withf(|_, _, _, relayer| *relayer == Address([0x99; 20]))
            .returning(|_, _, _, _| Ok(false));
        contract.expect_vote_proposal().times(1).returning(|_, _, _, _| Ok(()));

        let metrics = Arc::new(WriterMetrics::new());
        let mut writer = Writer::new(
            Arc::new(conn),
            &config("https://unused"),
            stop_rx,
            sys_tx,
            Some(metrics.clone()),
        )
        .unwrap();
        writer.set_contract(Arc::new(contract));

        writer.start().await.unwrap();
        assert!(writer.resolve_message(&fungible_from(2)).await);
        assert_eq!(metrics.snapshot().votes_submitted, 1);
    }

    #[tokio::test]
    async fn test_injected_compliance_checker() {
        let mut checker = MockComplianceChecker::new();
        checker
            .expect_check()
            .withf(|request| request.symbol == "USDC" && request.network == "Ethereum")
            .times(1)
            .returning(|_| Err(Error::ComplianceRejected("status None".to_string())));

        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().never();

        let (mut writer, metrics) = writer("https://unused/kyt-status", handler);
        writer.set_compliance_checker(Arc::new(checker));
        assert!(!writer.resolve_message(&fungible_from(1)).await);
        assert_eq!(metrics.snapshot().compliance_rejections, 1);
    }

    #[tokio::test]
    async fn test_monitored_source_always_screened() {
        let (server, mock) = kyt_server(200, r#"{"status": false}"#, 1).await;

        let mut json = serde_json::to_value(config(&format!("{}/kyt-status", server.url()))).unwrap();
        json["compliance"]["enabled"] = json!(false);
        let cfg: Config = serde_json::from_value(json).unwrap();

        let mut handler = MockProposalHandler::new();
        handler.expect_fungible().never();

        let (_stop_tx, stop_rx) = watch::channel(false);
        let (sys_tx, _sys_rx) = mpsc::unbounded_channel();
        let mut writer = Writer::new(Arc::new(MockConnection::new()), &cfg, stop_rx, sys_tx, None).unwrap();
        writer.set_proposal_handler(Arc::new(handler));

        assert!(!writer.resolve_message(&fungible_from(1)).await);
        mock.assert_async().await;
    }

    #[test]
    fn test_new_rejects_invalid_timeout() {
        for timeout_secs in [0, 3600] {
            let mut cfg = config("https://kyt.example.com/kyt-status");
            cfg.compliance.timeout_secs = timeout_secs;
            let (_stop_tx, stop_rx) = watch::channel(false);
            let (sys_tx, _sys_rx) = mpsc::unbounded_channel();
            let result = Writer::new(Arc::new(MockConnection::new()), &cfg, stop_rx, sys_tx, None);
            assert!(matches!(result, Err(Error::Config(_))), "timeout {}", timeout_secs);
        }
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address(&format!("0x{}", "99".repeat(20))).unwrap(), Address([0x99; 20]));
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("zz").is_err());
    }
}
