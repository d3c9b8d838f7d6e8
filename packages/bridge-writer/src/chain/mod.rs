use async_trait::async_trait;
use crate::{
    proposal::ProposalStatus,
    types::{Address, ChainId, DepositNonce, ResourceId},
    Result,
};

/// 目标链节点连接
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connection: Send + Sync {
    /// 节点地址，用于日志
    fn endpoint(&self) -> &str;

    /// 节点不可达时返回 [`crate::Error::ConnectionLost`]
    async fn ensure_connected(&self) -> Result<()>;
}

/// 已绑定的目标链桥合约，编码、哈希与签名由实现该特征的绑定层负责
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeContract: Send + Sync {
    /// 资源对应的 handler 合约地址
    async fn resource_handler(&self, resource_id: ResourceId) -> Result<Address>;

    /// 由 `handler` 与 `data` 计算的提案哈希
    fn proposal_data_hash(&self, handler: Address, data: &[u8]) -> [u8; 32];

    async fn proposal_status(
        &self,
        source: ChainId,
        nonce: DepositNonce,
        data_hash: [u8; 32],
    ) -> Result<ProposalStatus>;

    async fn has_voted(
        &self,
        source: ChainId,
        nonce: DepositNonce,
        data_hash: [u8; 32],
        relayer: Address,
    ) -> Result<bool>;

    async fn vote_proposal(
        &self,
        source: ChainId,
        nonce: DepositNonce,
        resource_id: ResourceId,
        data_hash: [u8; 32],
    ) -> Result<()>;

    async fn execute_proposal(
        &self,
        source: ChainId,
        nonce: DepositNonce,
        resource_id: ResourceId,
        data: Vec<u8>,
    ) -> Result<()>;
}

pub mod rpc;

pub use rpc::RpcConnection;
