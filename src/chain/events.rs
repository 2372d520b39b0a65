use std::sync::LazyLock;

use alloy_primitives::{Address, B256, U256, keccak256};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RawLog;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "PascalCase")]
pub enum ChainEvent {
    OfferOpened { offer_id: Uuid, interface_id: Vec<u8> },
    OfferEdited { offer_id: Uuid },
    OfferCanceled { offer_id: Uuid },
    OfferTaken { offer_id: Uuid, taker_interface_id: Vec<u8> },
    ServiceFeeRateChanged { new_service_fee_rate: U256 },
    SwapFilled { swap_id: Uuid },
    PaymentSent { swap_id: Uuid },
    PaymentReceived { swap_id: Uuid },
    BuyerClosed { swap_id: Uuid },
    SellerClosed { swap_id: Uuid },
}

/// A decoded event together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event: ChainEvent,
    pub chain_id: u64,
    pub transaction_hash: B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    OfferOpened,
    OfferEdited,
    OfferCanceled,
    OfferTaken,
    ServiceFeeRateChanged,
    SwapFilled,
    PaymentSent,
    PaymentReceived,
    BuyerClosed,
    SellerClosed,
}

impl Kind {
    const ALL: [Kind; 10] = [
        Kind::OfferOpened,
        Kind::OfferEdited,
        Kind::OfferCanceled,
        Kind::OfferTaken,
        Kind::ServiceFeeRateChanged,
        Kind::SwapFilled,
        Kind::PaymentSent,
        Kind::PaymentReceived,
        Kind::BuyerClosed,
        Kind::SellerClosed,
    ];

    fn signature(self) -> &'static str {
        match self {
            Kind::OfferOpened => "OfferOpened(bytes16,bytes)",
            Kind::OfferEdited => "OfferEdited(bytes16)",
            Kind::OfferCanceled => "OfferCanceled(bytes16)",
            Kind::OfferTaken => "OfferTaken(bytes16,bytes)",
            Kind::ServiceFeeRateChanged => "ServiceFeeRateChanged(uint256)",
            Kind::SwapFilled => "SwapFilled(bytes16)",
            Kind::PaymentSent => "PaymentSent(bytes16)",
            Kind::PaymentReceived => "PaymentReceived(bytes16)",
            Kind::BuyerClosed => "BuyerClosed(bytes16)",
            Kind::SellerClosed => "SellerClosed(bytes16)",
        }
    }

    fn topic(self) -> B256 {
        keccak256(self.signature().as_bytes())
    }
}

static TOPICS: LazyLock<Vec<(B256, Kind)>> =
    LazyLock::new(|| Kind::ALL.into_iter().map(|kind| (kind.topic(), kind)).collect());

impl ChainEvent {
    fn kind(&self) -> Kind {
        match self {
            ChainEvent::OfferOpened { .. } => Kind::OfferOpened,
            ChainEvent::OfferEdited { .. } => Kind::OfferEdited,
            ChainEvent::OfferCanceled { .. } => Kind::OfferCanceled,
            ChainEvent::OfferTaken { .. } => Kind::OfferTaken,
            ChainEvent::ServiceFeeRateChanged { .. } => Kind::ServiceFeeRateChanged,
            ChainEvent::SwapFilled { .. } => Kind::SwapFilled,
            ChainEvent::PaymentSent { .. } => Kind::PaymentSent,
            ChainEvent::PaymentReceived { .. } => Kind::PaymentReceived,
            ChainEvent::BuyerClosed { .. } => Kind::BuyerClosed,
            ChainEvent::SellerClosed { .. } => Kind::SellerClosed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind() {
            Kind::OfferOpened => "OfferOpened",
            Kind::OfferEdited => "OfferEdited",
            Kind::OfferCanceled => "OfferCanceled",
            Kind::OfferTaken => "OfferTaken",
            Kind::ServiceFeeRateChanged => "ServiceFeeRateChanged",
            Kind::SwapFilled => "SwapFilled",
            Kind::PaymentSent => "PaymentSent",
            Kind::PaymentReceived => "PaymentReceived",
            Kind::BuyerClosed => "BuyerClosed",
            Kind::SellerClosed => "SellerClosed",
        }
    }

    /// Offer or swap id the event refers to, if any.
    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            ChainEvent::OfferOpened { offer_id, .. }
            | ChainEvent::OfferEdited { offer_id }
            | ChainEvent::OfferCanceled { offer_id }
            | ChainEvent::OfferTaken { offer_id, .. } => Some(*offer_id),
            ChainEvent::SwapFilled { swap_id }
            | ChainEvent::PaymentSent { swap_id }
            | ChainEvent::PaymentReceived { swap_id }
            | ChainEvent::BuyerClosed { swap_id }
            | ChainEvent::SellerClosed { swap_id } => Some(*swap_id),
            ChainEvent::ServiceFeeRateChanged { .. } => None,
        }
    }

    pub fn topic(&self) -> B256 {
        self.kind().topic()
    }
}

/// Decodes a log emitted by `escrow`. Returns `None` for logs of other
/// contracts and for event types this engine does not follow.
pub fn decode_log(escrow: Address, log: &RawLog) -> Result<Option<ChainEvent>> {
    if log.address != escrow {
        return Ok(None);
    }
    let Some(topic0) = log.topics.first() else {
        tracing::trace!("escrow log without topics, skipping");
        return Ok(None);
    };
    let Some(kind) = TOPICS.iter().find(|(t, _)| t == topic0).map(|(_, k)| *k) else {
        tracing::trace!(topic = %topic0, "escrow log of an unfollowed event, skipping");
        return Ok(None);
    };

    let data = &log.data;
    let event = match kind {
        Kind::OfferOpened => ChainEvent::OfferOpened {
            offer_id: bytes16_at(data, 0)?,
            interface_id: dynamic_bytes_at(data, 1)?,
        },
        Kind::OfferEdited => ChainEvent::OfferEdited {
            offer_id: bytes16_at(data, 0)?,
        },
        Kind::OfferCanceled => ChainEvent::OfferCanceled {
            offer_id: bytes16_at(data, 0)?,
        },
        Kind::OfferTaken => ChainEvent::OfferTaken {
            offer_id: bytes16_at(data, 0)?,
            taker_interface_id: dynamic_bytes_at(data, 1)?,
        },
        Kind::ServiceFeeRateChanged => ChainEvent::ServiceFeeRateChanged {
            new_service_fee_rate: U256::from_be_slice(word(data, 0)?),
        },
        Kind::SwapFilled => ChainEvent::SwapFilled {
            swap_id: bytes16_at(data, 0)?,
        },
        Kind::PaymentSent => ChainEvent::PaymentSent {
            swap_id: bytes16_at(data, 0)?,
        },
        Kind::PaymentReceived => ChainEvent::PaymentReceived {
            swap_id: bytes16_at(data, 0)?,
        },
        Kind::BuyerClosed => ChainEvent::BuyerClosed {
            swap_id: bytes16_at(data, 0)?,
        },
        Kind::SellerClosed => ChainEvent::SellerClosed {
            swap_id: bytes16_at(data, 0)?,
        },
    };
    Ok(Some(event))
}

/// ABI-encodes `event` the way the escrow contract emits it.
pub fn encode_log(escrow: Address, event: &ChainEvent) -> RawLog {
    let mut data = Vec::new();
    match event {
        ChainEvent::OfferOpened {
            offer_id,
            interface_id: bytes,
        }
        | ChainEvent::OfferTaken {
            offer_id,
            taker_interface_id: bytes,
        } => {
            data.extend_from_slice(&bytes16_word(offer_id));
            data.extend_from_slice(&u64_word(64));
            data.extend_from_slice(&u64_word(bytes.len() as u64));
            data.extend_from_slice(bytes);
            let pad = (32 - bytes.len() % 32) % 32;
            data.extend(std::iter::repeat_n(0u8, pad));
        }
        ChainEvent::ServiceFeeRateChanged {
            new_service_fee_rate,
        } => data.extend_from_slice(&new_service_fee_rate.to_be_bytes::<32>()),
        other => {
            if let Some(id) = other.entity_id() {
                data.extend_from_slice(&bytes16_word(&id));
            }
        }
    }
    RawLog {
        address: escrow,
        topics: vec![event.topic()],
        data,
    }
}

fn word(data: &[u8], index: usize) -> Result<&[u8]> {
    data.get(index * 32..(index + 1) * 32).ok_or_else(|| {
        EngineError::InvalidValue(format!(
            "event data too short for word {index}: {} bytes",
            data.len()
        ))
        .into()
    })
}

fn bytes16_at(data: &[u8], index: usize) -> Result<Uuid> {
    let w = word(data, index)?;
    let mut raw = [0u8; 16];
    raw.copy_from_slice(&w[..16]);
    Ok(Uuid::from_bytes(raw))
}

fn usize_from_word(w: &[u8]) -> Result<usize> {
    if w[..24].iter().any(|b| *b != 0) {
        return Err(EngineError::InvalidValue("abi offset/length out of range".into()).into());
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&w[24..]);
    usize::try_from(u64::from_be_bytes(raw))
        .map_err(|_| EngineError::InvalidValue("abi offset/length out of range".into()).into())
}

fn dynamic_bytes_at(data: &[u8], index: usize) -> Result<Vec<u8>> {
    let offset = usize_from_word(word(data, index)?)?;
    let len_word = data.get(offset..offset.saturating_add(32)).ok_or_else(|| {
        EngineError::InvalidValue(format!("dynamic bytes offset {offset} beyond data"))
    })?;
    let len = usize_from_word(len_word)?;
    let start = offset + 32;
    data.get(start..start.saturating_add(len))
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            EngineError::InvalidValue(format!("dynamic bytes length {len} beyond data")).into()
        })
}

fn bytes16_word(id: &Uuid) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[..16].copy_from_slice(id.as_bytes());
    w
}

fn u64_word(v: u64) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[24..].copy_from_slice(&v.to_be_bytes());
    w
}
