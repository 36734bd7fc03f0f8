//! Hosted-backend clients for RaithaMitra.
//!
//! This crate provides the collaborators the account recovery flow talks to:
//! a document store and a phone-passcode identity provider.
//!
//! ## Features
//!
//! - **DocumentStore**: trait for get/query/set and atomic batched writes
//! - **FirestoreClient**: REST implementation of the document store
//! - **MemoryStore**: in-process store with fault injection, also used for JSON snapshots
//! - **PhoneAuthClient**: REST implementation of the passcode identity provider

pub mod auth;
mod error;
pub mod firestore;
pub mod memory;
mod records;
mod store;
mod types;
pub mod value;

pub use auth::{
    AuthError, IdentityProvider, PhoneAuthClient, PhoneAuthConfig, VerificationSession,
    VerifiedIdentity,
};
pub use error::StoreError;
pub use firestore::{FirestoreClient, FirestoreConfig};
pub use memory::{FaultPoint, MemoryStore};
pub use records::*;
pub use store::{CommitInfo, DocumentStore, STORE_BATCH_LIMIT, WriteBatch, WriteOp};
pub use types::*;
