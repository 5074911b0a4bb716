//! # Storage Module
//!
//! Local persistence for key material.
//!
//! Only the identity secret key is persisted. Message history lives in the
//! server's durable log and is reconciled in memory; peer public keys are
//! cached for the session and re-fetched after a restart.

mod key_store;
mod secure_store;

pub use key_store::KeyMaterialStore;
pub use secure_store::{keys, user_key, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
