use std::fmt;

use alloy_primitives::keccak256;
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::{self, SharedStore};

/// Interface id of a public key: the keccak-256 hash of its encoded bytes.
pub fn interface_id(public_key: &[u8]) -> Vec<u8> {
    keccak256(public_key).to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub interface_id: Vec<u8>,
    pub bytes: Vec<u8>,
}

impl PublicKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            interface_id: interface_id(&bytes),
            bytes,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: Vec<u8>,
}

impl KeyPair {
    pub fn new(public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            public_key: PublicKey::new(public_key),
            private_key,
        }
    }

    pub fn interface_id(&self) -> &[u8] {
        &self.public_key.interface_id
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("interface_id", &hex::encode(self.interface_id()))
            .finish_non_exhaustive()
    }
}

/// Local key pairs and known counterparty public keys, by interface id.
pub trait KeyStore: Send + Sync {
    /// Returns `false` if a key with the same interface id was already known.
    fn store_public_key(&self, key: &PublicKey) -> Result<bool>;
    fn get_public_key(&self, interface_id: &[u8]) -> Result<Option<PublicKey>>;
    fn store_key_pair(&self, key_pair: &KeyPair) -> Result<bool>;
    fn get_key_pair(&self, interface_id: &[u8]) -> Result<Option<KeyPair>>;
}

/// [`KeyStore`] kept in the engine's SQLite database.
#[derive(Clone)]
pub struct StoreKeyStore {
    store: SharedStore,
}

impl StoreKeyStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }
}

impl KeyStore for StoreKeyStore {
    fn store_public_key(&self, key: &PublicKey) -> Result<bool> {
        store::lock(&self.store)?.store_public_key(&key.interface_id, &key.bytes)
    }

    fn get_public_key(&self, interface_id: &[u8]) -> Result<Option<PublicKey>> {
        Ok(store::lock(&self.store)?
            .get_public_key(interface_id)?
            .map(|bytes| PublicKey {
                interface_id: interface_id.to_vec(),
                bytes,
            }))
    }

    fn store_key_pair(&self, key_pair: &KeyPair) -> Result<bool> {
        let mut store = store::lock(&self.store)?;
        // A key pair's public key is also a known public key.
        store.store_public_key(key_pair.interface_id(), &key_pair.public_key.bytes)?;
        store.store_key_pair(
            key_pair.interface_id(),
            &key_pair.public_key.bytes,
            &key_pair.private_key,
        )
    }

    fn get_key_pair(&self, interface_id: &[u8]) -> Result<Option<KeyPair>> {
        Ok(store::lock(&self.store)?
            .get_key_pair(interface_id)?
            .map(|(public, private)| KeyPair {
                public_key: PublicKey {
                    interface_id: interface_id.to_vec(),
                    bytes: public,
                },
                private_key: private,
            }))
    }
}
