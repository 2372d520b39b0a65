//! Typed peer messages and the transport boundary that carries them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keys::{KeyPair, PublicKey};

/// A maker announcing the key that messages about `offer_id` go to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyAnnouncement {
    pub offer_id: Uuid,
    pub public_key: PublicKey,
}

/// Sent by the taker to the maker once the take transaction is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakerInformationMessage {
    pub swap_id: Uuid,
    pub recipient_interface_id: Vec<u8>,
    pub public_key: PublicKey,
    pub settlement_method_details: Option<String>,
}

/// The maker's answer to [`TakerInformationMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerInformationMessage {
    pub swap_id: Uuid,
    pub sender_interface_id: Vec<u8>,
    pub recipient_interface_id: Vec<u8>,
    pub settlement_method_details: Option<String>,
}

/// Messages delivered by the transport, already decrypted and authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    PublicKeyAnnouncement(PublicKeyAnnouncement),
    TakerInformation(TakerInformationMessage),
    MakerInformation(MakerInformationMessage),
}

/// Outgoing side of the peer-to-peer channel. Encryption and addressing by
/// interface id are the transport's job.
#[async_trait::async_trait]
pub trait PeerMessenger: Send + Sync {
    async fn announce_public_key(&self, offer_id: Uuid, key_pair: &KeyPair) -> Result<()>;

    async fn send_taker_information(
        &self,
        maker_public_key: &PublicKey,
        taker_key_pair: &KeyPair,
        swap_id: Uuid,
        settlement_method_details: Option<String>,
    ) -> Result<()>;

    async fn send_maker_information(
        &self,
        taker_public_key: &PublicKey,
        maker_key_pair: &KeyPair,
        swap_id: Uuid,
        settlement_method_details: Option<String>,
    ) -> Result<()>;
}
