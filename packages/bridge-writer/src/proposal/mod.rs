//! 将通过检查的转账路由到提案处理器，以及通过桥合约投票或执行提案的默认处理器

use async_trait::async_trait;
use num_bigint::BigUint;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use crate::{
    chain::BridgeContract,
    classifier::{FungibleTransfer, GenericTransfer, NonFungibleTransfer, Transfer},
    metrics::WriterMetrics,
    types::{Address, Message},
    Error, Result,
};

const WORD: usize = 32;

/// 目标链桥合约中的提案状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Inactive,
    Active,
    Passed,
    Transferred,
    Cancelled,
}

impl ProposalStatus {
    /// 提案进入这些状态后无需再提交
    pub fn is_complete(self) -> bool {
        matches!(self, ProposalStatus::Transferred | ProposalStatus::Cancelled)
    }
}

impl TryFrom<u8> for ProposalStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ProposalStatus::Inactive),
            1 => Ok(ProposalStatus::Active),
            2 => Ok(ProposalStatus::Passed),
            3 => Ok(ProposalStatus::Transferred),
            4 => Ok(ProposalStatus::Cancelled),
            other => Err(Error::Chain(format!("Unknown proposal status: {}", other))),
        }
    }
}

impl From<ProposalStatus> for u8 {
    fn from(status: ProposalStatus) -> Self {
        match status {
            ProposalStatus::Inactive => 0,
            ProposalStatus::Active => 1,
            ProposalStatus::Passed => 2,
            ProposalStatus::Transferred => 3,
            ProposalStatus::Cancelled => 4,
        }
    }
}

/// 每种资产类型对应一个处理方法，接收原始消息与解码后的 payload
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProposalHandler: Send + Sync {
    async fn fungible(&self, message: &Message, transfer: &FungibleTransfer) -> bool;

    async fn non_fungible(&self, message: &Message, transfer: &NonFungibleTransfer) -> bool;

    async fn generic(&self, message: &Message, transfer: &GenericTransfer) -> bool;
}

/// 按类型分发到对应处理方法，原样返回处理结果
pub async fn dispatch(handler: &dyn ProposalHandler, message: &Message, transfer: &Transfer) -> bool {
    match transfer {
        Transfer::Fungible(t) => handler.fungible(message, t).await,
        Transfer::NonFungible(t) => handler.non_fungible(message, t).await,
        Transfer::Generic(t) => handler.generic(message, t).await,
    }
}

fn word_from_uint(value: &BigUint, field: &str) -> Result<[u8; WORD]> {
    let bytes = value.to_bytes_be();
    if bytes.len() > WORD {
        return Err(Error::ProposalData(format!("{} exceeds 32 bytes", field)));
    }
    let mut word = [0u8; WORD];
    word[WORD - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}

fn word_from_len(len: usize) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&(len as u64).to_be_bytes());
    word
}

/// amount ‖ len(recipient) ‖ recipient
pub fn fungible_data(transfer: &FungibleTransfer) -> Result<Vec<u8>> {
    let recipient = transfer.recipient.0;
    let mut data = Vec::with_capacity(2 * WORD + recipient.len());
    data.extend_from_slice(&word_from_uint(&transfer.amount, "amount")?);
    data.extend_from_slice(&word_from_len(recipient.len()));
    data.extend_from_slice(&recipient);
    Ok(data)
}

/// token id ‖ len(recipient) ‖ recipient ‖ len(metadata) ‖ metadata
pub fn non_fungible_data(transfer: &NonFungibleTransfer) -> Result<Vec<u8>> {
    let mut data =
        Vec::with_capacity(3 * WORD + transfer.recipient.len() + transfer.metadata.len());
    data.extend_from_slice(&word_from_uint(&transfer.token_id, "token id")?);
    data.extend_from_slice(&word_from_len(transfer.recipient.len()));
    data.extend_from_slice(&transfer.recipient);
    data.extend_from_slice(&word_from_len(transfer.metadata.len()));
    data.extend_from_slice(&transfer.metadata);
    Ok(data)
}

/// len(metadata) ‖ metadata
pub fn generic_data(transfer: &GenericTransfer) -> Vec<u8> {
    let mut data = Vec::with_capacity(WORD + transfer.metadata.len());
    data.extend_from_slice(&word_from_len(transfer.metadata.len()));
    data.extend_from_slice(&transfer.metadata);
    data
}

/// 向已绑定的桥合约提交提案
pub struct ContractProposer {
    contract: Arc<dyn BridgeContract>,
    relayer: Address,
    sys_err: mpsc::UnboundedSender<Error>,
    metrics: Option<Arc<WriterMetrics>>,
}

impl ContractProposer {
    pub fn new(
        contract: Arc<dyn BridgeContract>,
        relayer: Address,
        sys_err: mpsc::UnboundedSender<Error>,
        metrics: Option<Arc<WriterMetrics>>,
    ) -> Self {
        Self {
            contract,
            relayer,
            sys_err,
            metrics,
        }
    }

    async fn submit(&self, message: &Message, data: Result<Vec<u8>>) -> bool {
        let result = match data {
            Ok(data) => self.try_submit(message, data).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(submitted) => submitted,
            Err(Error::ConnectionLost(reason)) => {
                error!(src = %message.source, nonce = %message.deposit_nonce, reason = %reason, "Lost connection while submitting proposal");
                if self.sys_err.send(Error::ConnectionLost(reason)).is_err() {
                    error!("Fatal error channel closed");
                }
                false
            }
            Err(e) => {
                error!(src = %message.source, nonce = %message.deposit_nonce, err = %e, "Failed to submit proposal");
                false
            }
        }
    }

    /// `Ok(false)` 表示本中继无需再做任何操作
    async fn try_submit(&self, message: &Message, data: Vec<u8>) -> Result<bool> {
        let source = message.source;
        let nonce = message.deposit_nonce;
        let resource_id = message.resource_id;

        let handler = self.contract.resource_handler(resource_id).await?;
        let data_hash = self.contract.proposal_data_hash(handler, &data);
        let status = self.contract.proposal_status(source, nonce, data_hash).await?;

        match status {
            status if status.is_complete() => {
                info!(src = %source, nonce = %nonce, status = ?status, "Proposal already complete, skipping");
                Ok(false)
            }
            ProposalStatus::Passed => {
                self.contract.execute_proposal(source, nonce, resource_id, data).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_execution();
                }
                info!(src = %source, nonce = %nonce, "Executed passed proposal");
                Ok(true)
            }
            _ => {
                if self.contract.has_voted(source, nonce, data_hash, self.relayer).await? {
                    info!(src = %source, nonce = %nonce, relayer = %self.relayer, "Relayer has already voted, skipping");
                    return Ok(false);
                }
                self.contract.vote_proposal(source, nonce, resource_id, data_hash).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_vote();
                }
                info!(src = %source, nonce = %nonce, data_hash = %hex::encode(data_hash), "Submitted proposal vote");
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl ProposalHandler for ContractProposer {
    async fn fungible(&self, message: &Message, transfer: &FungibleTransfer) -> bool {
        self.submit(message, fungible_data(transfer)).await
    }

    async fn non_fungible(&self, message: &Message, transfer: &NonFungibleTransfer) -> bool {
        self.submit(message, non_fungible_data(transfer)).await
    }

    async fn generic(&self, message: &Message, transfer: &GenericTransfer) -> bool {
        self.submit(message, Ok(generic_data(transfer))).await
    }
}

/// 只记录将要提交的提案数据并返回成功
#[derive(Debug, Default)]
pub struct DryRunProposer;

impl DryRunProposer {
    fn report(message: &Message, data: Result<Vec<u8>>) -> bool {
        match data {
            Ok(data) => {
                info!(
                    src = %message.source,
                    dst = %message.destination,
                    nonce = %message.deposit_nonce,
                    r_id = %message.resource_id,
                    data = %hex::encode(&data),
                    "Dry run proposal"
                );
                true
            }
            Err(e) => {
                error!(err = %e, "Failed to build proposal data");
                false
            }
        }
    }
}

#[async_trait]
impl ProposalHandler for DryRunProposer {
    async fn fungible(&self, message: &Message, transfer: &FungibleTransfer) -> bool {
        Self::report(message, fungible_data(transfer))
    }

    async fn non_fungible(&self, message: &Message, transfer: &NonFungibleTransfer) -> bool {
        Self::report(message, non_fungible_data(transfer))
    }

    async fn generic(&self, message: &Message, transfer: &GenericTransfer) -> bool {
        Self::report(message, Ok(generic_data(transfer)))
    }
}
