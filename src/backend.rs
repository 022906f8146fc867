//! Entry point tying the client, auth, documents, files and polling together.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::api::ApiClient;
use crate::auth::Auth;
use crate::config::BackendConfig;
use crate::documents::{DocumentStore, RestDocuments};
use crate::error::{AdapterError, Result};
use crate::files::Files;
use crate::query::{CollectionRef, DocumentRef, DocumentSnapshot, Query, QuerySnapshot};
use crate::storage::CredentialStorage;
use crate::subscription::{self, Unsubscribe};

#[derive(Clone)]
pub struct RestBackend {
    client: Arc<ApiClient>,
    auth: Auth,
    files: Files,
    documents: Arc<RestDocuments>,
}

impl RestBackend {
    /// Build the backend without touching the network.
    pub fn new(config: BackendConfig, storage: Arc<dyn CredentialStorage>) -> Result<Self> {
        let client = Arc::new(ApiClient::new(config, storage)?);
        Ok(Self {
            auth: Auth::new(client.clone()),
            files: Files::new(client.clone()),
            documents: Arc::new(RestDocuments::new(client.clone())),
            client,
        })
    }

    /// Build the backend and restore any stored session.
    pub async fn start(config: BackendConfig, storage: Arc<dyn CredentialStorage>) -> Result<Self> {
        let backend = Self::new(config, storage)?;
        info!(api_url = %backend.config().api_url, "backend adapter starting");
        backend.auth.init_session().await;
        Ok(backend)
    }

    pub fn config(&self) -> &BackendConfig {
        self.client.config()
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    pub fn files(&self) -> &Files {
        &self.files
    }

    pub fn documents(&self) -> Arc<RestDocuments> {
        self.documents.clone()
    }

    /// Poll `query` at the configured interval.
    pub fn on_snapshot<N, E>(&self, query: Query, on_next: N, on_error: E) -> Unsubscribe
    where
        N: FnMut(QuerySnapshot) + Send + 'static,
        E: FnMut(AdapterError) + Send + 'static,
    {
        subscription::on_snapshot(
            self.documents.clone(),
            query,
            self.config().poll_interval,
            on_next,
            on_error,
        )
    }

    pub fn on_doc_snapshot<N, E>(&self, doc: DocumentRef, on_next: N, on_error: E) -> Unsubscribe
    where
        N: FnMut(DocumentSnapshot) + Send + 'static,
        E: FnMut(AdapterError) + Send + 'static,
    {
        subscription::on_doc_snapshot(
            self.documents.clone(),
            doc,
            self.config().poll_interval,
            on_next,
            on_error,
        )
    }
}

#[async_trait]
impl DocumentStore for RestBackend {
    async fn get_doc(&self, doc: &DocumentRef) -> Result<DocumentSnapshot> {
        self.documents.get_doc(doc).await
    }

    async fn run_query(&self, query: &Query) -> Result<QuerySnapshot> {
        self.documents.run_query(query).await
    }

    async fn set_doc(&self, doc: &DocumentRef, data: Value, merge: bool) -> Result<()> {
        self.documents.set_doc(doc, data, merge).await
    }

    async fn update_doc(&self, doc: &DocumentRef, data: Value) -> Result<()> {
        self.documents.update_doc(doc, data).await
    }

    async fn delete_doc(&self, doc: &DocumentRef) -> Result<()> {
        self.documents.delete_doc(doc).await
    }

    async fn add_doc(&self, collection: &CollectionRef, data: Value) -> Result<DocumentRef> {
        self.documents.add_doc(collection, data).await
    }
}
