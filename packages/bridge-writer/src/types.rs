use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u8);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepositNonce(pub u64);

impl fmt::Display for DepositNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 资源 ID，标识消息涉及的资产与 handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub [u8; 32]);

impl ResourceId {
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = hex_bytes::deserialize(deserializer)?;
        let raw: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            serde::de::Error::custom(format!("resource id must be 32 bytes, got {}", b.len()))
        })?;
        Ok(ResourceId(raw))
    }
}

/// 目标链上 20 字节的账户或合约地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Address)
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn prefixed_hex(&self) -> String {
        format!("0x{}", self.hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed_hex())
    }
}

/// 源链存款交易哈希
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(TxHash)
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn prefixed_hex(&self) -> String {
        format!("0x{}", self.hex())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed_hex())
    }
}

/// 源链声明的转账类型，未知编码会被保留以便显式拒绝
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageType {
    FungibleTransfer,
    NonFungibleTransfer,
    GenericTransfer,
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(code: u8) -> Self {
        match code {
            0 => MessageType::FungibleTransfer,
            1 => MessageType::NonFungibleTransfer,
            2 => MessageType::GenericTransfer,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::FungibleTransfer => 0,
            MessageType::NonFungibleTransfer => 1,
            MessageType::GenericTransfer => 2,
            MessageType::Unknown(code) => code,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::FungibleTransfer => f.write_str("FungibleTransfer"),
            MessageType::NonFungibleTransfer => f.write_str("NonFungibleTransfer"),
            MessageType::GenericTransfer => f.write_str("GenericTransfer"),
            MessageType::Unknown(code) => write!(f, "Unknown({})", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadField {
    Bytes(#[serde(with = "hex_bytes")] Vec<u8>),
    Text(String),
}

impl PayloadField {
    pub fn kind(&self) -> &'static str {
        match self {
            PayloadField::Bytes(_) => "bytes",
            PayloadField::Text(_) => "text",
        }
    }
}

impl From<Vec<u8>> for PayloadField {
    fn from(bytes: Vec<u8>) -> Self {
        PayloadField::Bytes(bytes)
    }
}

impl From<&[u8]> for PayloadField {
    fn from(bytes: &[u8]) -> Self {
        PayloadField::Bytes(bytes.to_vec())
    }
}

impl From<&str> for PayloadField {
    fn from(text: &str) -> Self {
        PayloadField::Text(text.to_string())
    }
}

/// 中继核心转发的跨链消息，writer 只读使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub source: ChainId,
    pub destination: ChainId,
    pub deposit_nonce: DepositNonce,
    pub resource_id: ResourceId,
    pub payload: Vec<PayloadField>,
}

impl Message {
    pub fn new(
        message_type: MessageType,
        source: ChainId,
        destination: ChainId,
        deposit_nonce: DepositNonce,
        resource_id: ResourceId,
        payload: Vec<PayloadField>,
    ) -> Self {
        Self {
            message_type,
            source,
            destination,
            deposit_nonce,
            resource_id,
            payload,
        }
    }

    /// 按固定的六字段布局构造同质化代币转账
    #[allow(clippy::too_many_arguments)]
    pub fn fungible_transfer(
        source: ChainId,
        destination: ChainId,
        deposit_nonce: DepositNonce,
        resource_id: ResourceId,
        token: Address,
        amount: &[u8],
        recipient: Address,
        tx_hash: TxHash,
        handler: Address,
        symbol: &str,
    ) -> Self {
        Self::new(
            MessageType::FungibleTransfer,
            source,
            destination,
            deposit_nonce,
            resource_id,
            vec![
                token.0.as_slice().into(),
                amount.into(),
                recipient.0.as_slice().into(),
                tx_hash.0.as_slice().into(),
                handler.0.as_slice().into(),
                symbol.as_bytes().into(),
            ],
        )
    }
}

/// 字节字段的小写十六进制编码，解析时接受可选的 `0x` 前缀
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let trimmed = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(trimmed).map_err(serde::de::Error::custom)
    }
}
