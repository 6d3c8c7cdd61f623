/// Cryptographic primitives for the deduplication node
///
/// This module implements:
/// - The node's static key pair and every key derived from it
/// - AES-256-GCM sealing shared by the template store and the audit log
pub mod aead;
pub mod keys;

pub use aead::{open, seal, CryptoError, Sealed};
pub use keys::{KeyError, NodeKeyPair};
