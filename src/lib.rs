//! Retail dashboard backend adapter.
//!
//! Exposes a Firestore-shaped client (auth sessions, document reads and
//! writes, queries, live snapshots, file storage) on top of a plain REST
//! API. Tokens are kept in a [`CredentialStorage`]; expired access tokens
//! are refreshed transparently, and live snapshots are emulated by polling.
//!
//! ```no_run
//! # async fn demo() -> retail_backend_adapter::Result<()> {
//! use std::sync::Arc;
//! use retail_backend_adapter::{collection, BackendConfig, KeyringStorage, RestBackend, WhereOp};
//!
//! let backend = RestBackend::start(BackendConfig::from_env()?, Arc::new(KeyringStorage::new())).await?;
//! backend.auth().login("owner@shop.example", "secret").await?;
//!
//! let low_stock = collection("products").query().where_("stock", WhereOp::LessThan, 5);
//! let sub = backend.on_snapshot(low_stock, |snap| println!("{} low", snap.len()), |e| eprintln!("{e}"));
//! # sub.unsubscribe();
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
mod db;
pub mod documents;
pub mod error;
pub mod files;
pub mod logging;
pub mod query;
pub mod session;
pub mod storage;
pub mod subscription;
pub mod tokens;

#[cfg(test)]
mod test_support;

pub use api::ApiClient;
pub use auth::Auth;
pub use backend::RestBackend;
pub use config::BackendConfig;
pub use documents::{DocumentStore, RestDocuments};
pub use error::{AdapterError, Result};
pub use files::Files;
pub use query::{
    collection, doc, limit, order_by, query, where_, CollectionRef, Direction, DocumentRef,
    DocumentSnapshot, Query, QueryConstraint, QuerySnapshot, WhereOp,
};
pub use session::{SessionUser, Subscription};
pub use storage::{CredentialStorage, KeyringStorage, MemoryStorage, SqliteStorage};
pub use subscription::{on_doc_snapshot, on_snapshot, Unsubscribe};
