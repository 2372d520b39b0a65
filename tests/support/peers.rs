use std::sync::Mutex;

use anyhow::Result;
use escrow_swap_sync::keys::{KeyPair, PublicKey};
use escrow_swap_sync::p2p::{
    MakerInformationMessage, PeerMessage, PeerMessenger, PublicKeyAnnouncement,
    TakerInformationMessage,
};
use uuid::Uuid;

/// Keeps every outgoing message so a test can deliver it to the other party.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<PeerMessage>>,
    offline: Mutex<bool>,
}

impl RecordingMessenger {
    pub fn take(&self) -> Vec<PeerMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }

    fn push(&self, msg: PeerMessage) -> Result<()> {
        if *self.offline.lock().unwrap() {
            anyhow::bail!("peer transport unavailable");
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

#[async_trait::async_trait]
impl PeerMessenger for RecordingMessenger {
    async fn announce_public_key(&self, offer_id: Uuid, key_pair: &KeyPair) -> Result<()> {
        self.push(PeerMessage::PublicKeyAnnouncement(PublicKeyAnnouncement {
            offer_id,
            public_key: key_pair.public_key.clone(),
        }))
    }

    async fn send_taker_information(
        &self,
        maker_public_key: &PublicKey,
        taker_key_pair: &KeyPair,
        swap_id: Uuid,
        settlement_method_details: Option<String>,
    ) -> Result<()> {
        self.push(PeerMessage::TakerInformation(TakerInformationMessage {
            swap_id,
            recipient_interface_id: maker_public_key.interface_id.clone(),
            public_key: taker_key_pair.public_key.clone(),
            settlement_method_details,
        }))
    }

    async fn send_maker_information(
        &self,
        taker_public_key: &PublicKey,
        maker_key_pair: &KeyPair,
        swap_id: Uuid,
        settlement_method_details: Option<String>,
    ) -> Result<()> {
        self.push(PeerMessage::MakerInformation(MakerInformationMessage {
            swap_id,
            sender_interface_id: maker_key_pair.interface_id().to_vec(),
            recipient_interface_id: taker_public_key.interface_id.clone(),
            settlement_method_details,
        }))
    }
}
