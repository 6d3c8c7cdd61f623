//! Persistence for the deduplication node.
//!
//! Only privacy-transformed feature sets are stored, encrypted per subject.
//! State is process-lifetime and in-memory.

pub mod template_store;

pub use template_store::{storage_handle, EncryptedTemplate, StoreError, TemplateStore};
