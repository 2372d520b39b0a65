pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod keys;
pub mod logging;
pub mod offer;
pub mod p2p;
pub mod store;
pub mod swap;
pub mod truth;

pub use coordinator::Coordinator;
pub use error::EngineError;
