//! 将按位置排列的消息 payload 解码为带类型的转账
//!
//! 所有下标与字段类型检查都在这里完成一次，与声明类型不符的 payload
//! 返回 [`Error::MalformedPayload`]。

use num_bigint::BigUint;
use tracing::debug;
use crate::{
    types::{Address, Message, MessageType, PayloadField, TxHash},
    Error, Result,
};

pub const FUNGIBLE_PAYLOAD_LEN: usize = 6;
pub const NON_FUNGIBLE_PAYLOAD_LEN: usize = 3;
pub const GENERIC_PAYLOAD_LEN: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FungibleTransfer {
    pub token: Address,
    pub amount: BigUint,
    pub recipient: Address,
    pub tx_hash: TxHash,
    pub handler: Address,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonFungibleTransfer {
    pub token_id: BigUint,
    /// 接收者按原始字节保存，长度不固定（例如非 EVM 链的接收地址），
    /// 提案数据中以长度前缀编码
    pub recipient: Vec<u8>,
    pub metadata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericTransfer {
    pub metadata: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Fungible(FungibleTransfer),
    NonFungible(NonFungibleTransfer),
    Generic(GenericTransfer),
}

/// 确认消息类型已知并解码 payload
pub fn classify(message: &Message) -> Result<Transfer> {
    let payload = &message.payload;
    match message.message_type {
        MessageType::FungibleTransfer => {
            expect_len(payload, FUNGIBLE_PAYLOAD_LEN)?;
            let transfer = FungibleTransfer {
                token: address_at(payload, 0)?,
                amount: BigUint::from_bytes_be(bytes_at(payload, 1)?),
                recipient: address_at(payload, 2)?,
                tx_hash: tx_hash_at(payload, 3)?,
                handler: address_at(payload, 4)?,
                symbol: text_at(payload, 5)?,
            };
            debug!(token_address = %transfer.token.hex(), "Decoded payload field");
            debug!(amount = %hex::encode(bytes_at(payload, 1)?), "Decoded payload field");
            debug!(recipient = %transfer.recipient.hex(), "Decoded payload field");
            debug!(tx_hash = %transfer.tx_hash.hex(), "Decoded payload field");
            debug!(handler_address = %transfer.handler.hex(), "Decoded payload field");
            debug!(token_symbol = %transfer.symbol, "Decoded payload field");
            Ok(Transfer::Fungible(transfer))
        }
        MessageType::NonFungibleTransfer => {
            expect_len(payload, NON_FUNGIBLE_PAYLOAD_LEN)?;
            let transfer = NonFungibleTransfer {
                token_id: BigUint::from_bytes_be(bytes_at(payload, 0)?),
                recipient: bytes_at(payload, 1)?.to_vec(),
                metadata: bytes_at(payload, 2)?.to_vec(),
            };
            debug!(token_id = %transfer.token_id, "Decoded payload field");
            debug!(recipient = %hex::encode(&transfer.recipient), "Decoded payload field");
            debug!(metadata = %hex::encode(&transfer.metadata), "Decoded payload field");
            Ok(Transfer::NonFungible(transfer))
        }
        MessageType::GenericTransfer => {
            expect_len(payload, GENERIC_PAYLOAD_LEN)?;
            let transfer = GenericTransfer {
                metadata: bytes_at(payload, 0)?.to_vec(),
            };
            debug!(metadata = %hex::encode(&transfer.metadata), "Decoded payload field");
            Ok(Transfer::Generic(transfer))
        }
        unknown @ MessageType::Unknown(_) => Err(Error::UnknownMessageType(unknown)),
    }
}

fn expect_len(payload: &[PayloadField], expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(Error::MalformedPayload {
            index: payload.len().min(expected),
            reason: format!("expected {} fields, got {}", expected, payload.len()),
        });
    }
    Ok(())
}

pub(crate) fn bytes_at(payload: &[PayloadField], index: usize) -> Result<&[u8]> {
    match payload.get(index) {
        Some(PayloadField::Bytes(bytes)) => Ok(bytes),
        Some(other) => Err(Error::MalformedPayload {
            index,
            reason: format!("expected bytes, got {}", other.kind()),
        }),
        None => Err(Error::MalformedPayload {
            index,
            reason: "field missing".to_string(),
        }),
    }
}

pub(crate) fn address_at(payload: &[PayloadField], index: usize) -> Result<Address> {
    let bytes = bytes_at(payload, index)?;
    Address::from_slice(bytes).ok_or_else(|| Error::MalformedPayload {
        index,
        reason: format!("expected 20-byte address, got {} bytes", bytes.len()),
    })
}

pub(crate) fn tx_hash_at(payload: &[PayloadField], index: usize) -> Result<TxHash> {
    let bytes = bytes_at(payload, index)?;
    TxHash::from_slice(bytes).ok_or_else(|| Error::MalformedPayload {
        index,
        reason: format!("expected 32-byte hash, got {} bytes", bytes.len()),
    })
}

/// 文本字段可能是 UTF-8 字节，也可能直接是文本
pub(crate) fn text_at(payload: &[PayloadField], index: usize) -> Result<String> {
    match payload.get(index) {
        Some(PayloadField::Text(text)) => Ok(text.clone()),
        Some(PayloadField::Bytes(bytes)) => {
            String::from_utf8(bytes.clone()).map_err(|e| Error::MalformedPayload {
                index,
                reason: format!("invalid utf-8: {}", e),
            })
        }
        None => Err(Error::MalformedPayload {
            index,
            reason: "field missing".to_string(),
        }),
    }
}
