//! Document reads, writes and queries.
//!
//! [`DocumentStore`] is the Firestore-shaped contract the dashboard codes
//! against; [`RestDocuments`] serves it from the `/firestore/*` endpoints.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::api::{ApiClient, RequestBody};
use crate::error::{AdapterError, Result};
use crate::query::{encode_path, CollectionRef, DocumentRef, DocumentSnapshot, Query, QuerySnapshot};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document. A missing document is [`DocumentSnapshot::not_found`],
    /// not an error.
    async fn get_doc(&self, doc: &DocumentRef) -> Result<DocumentSnapshot>;

    async fn run_query(&self, query: &Query) -> Result<QuerySnapshot>;

    /// Create or overwrite a document; with `merge`, only the given fields
    /// are written.
    async fn set_doc(&self, doc: &DocumentRef, data: Value, merge: bool) -> Result<()>;

    async fn update_doc(&self, doc: &DocumentRef, data: Value) -> Result<()>;

    async fn delete_doc(&self, doc: &DocumentRef) -> Result<()>;

    /// Create a document with a backend-assigned id.
    async fn add_doc(&self, collection: &CollectionRef, data: Value) -> Result<DocumentRef>;
}

fn require_object(data: &Value, op: &str) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(AdapterError::InvalidArgument(format!(
            "{op}: document data must be a JSON object"
        )))
    }
}

#[derive(Clone)]
pub struct RestDocuments {
    client: Arc<ApiClient>,
}

impl RestDocuments {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    fn document_path(doc: &DocumentRef) -> String {
        format!("/firestore/documents/{}", encode_path(doc.path()))
    }
}

#[async_trait]
impl DocumentStore for RestDocuments {
    async fn get_doc(&self, doc: &DocumentRef) -> Result<DocumentSnapshot> {
        let resp: Result<Value> = self
            .client
            .fetch_api(Method::GET, &Self::document_path(doc), RequestBody::Empty)
            .await;
        match resp {
            Ok(Value::Null) => Ok(DocumentSnapshot::not_found()),
            Ok(value) => {
                let snapshot = DocumentSnapshot::from_wire(value)?;
                if !snapshot.exists() {
                    debug!(path = doc.path(), "document absent (empty payload)");
                }
                Ok(snapshot)
            }
            Err(e) if e.is_not_found() => {
                debug!(path = doc.path(), error = %e, "document absent");
                Ok(DocumentSnapshot::not_found())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_query(&self, query: &Query) -> Result<QuerySnapshot> {
        let body = serde_json::to_value(query)
            .map_err(|e| AdapterError::InvalidArgument(format!("query: {e}")))?;
        let resp: Value = self
            .client
            .fetch_api(Method::POST, "/firestore/query", RequestBody::Json(body))
            .await?;
        let snapshot = QuerySnapshot::from_wire(resp)?;
        debug!(path = query.path(), docs = snapshot.len(), "query executed");
        Ok(snapshot)
    }

    async fn set_doc(&self, doc: &DocumentRef, data: Value, merge: bool) -> Result<()> {
        require_object(&data, "set_doc")?;
        let _: Value = self
            .client
            .fetch_api(
                Method::POST,
                &Self::document_path(doc),
                RequestBody::Json(serde_json::json!({ "data": data, "merge": merge })),
            )
            .await?;
        debug!(path = doc.path(), merge, "document written");
        Ok(())
    }

    async fn update_doc(&self, doc: &DocumentRef, data: Value) -> Result<()> {
        require_object(&data, "update_doc")?;
        let _: Value = self
            .client
            .fetch_api(
                Method::PATCH,
                &Self::document_path(doc),
                RequestBody::Json(serde_json::json!({ "data": data })),
            )
            .await?;
        debug!(path = doc.path(), "document updated");
        Ok(())
    }

    async fn delete_doc(&self, doc: &DocumentRef) -> Result<()> {
        let _: Value = self
            .client
            .fetch_api(Method::DELETE, &Self::document_path(doc), RequestBody::Empty)
            .await?;
        debug!(path = doc.path(), "document deleted");
        Ok(())
    }

    async fn add_doc(&self, collection: &CollectionRef, data: Value) -> Result<DocumentRef> {
        require_object(&data, "add_doc")?;
        let resp: Value = self
            .client
            .fetch_api(
                Method::POST,
                &format!("/firestore/add/{}", encode_path(collection.path())),
                RequestBody::Json(serde_json::json!({ "data": data })),
            )
            .await?;
        let id = resp
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AdapterError::InvalidResponse("add response without id".into()))?;
        debug!(path = collection.path(), id, "document added");
        Ok(collection.doc(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{collection, doc, Direction, WhereOp};
    use crate::test_support::{fresh_token, signed_in_client};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn store(server: &MockServer) -> RestDocuments {
        let (client, _storage) = signed_in_client(server, &fresh_token(), "r1");
        RestDocuments::new(client)
    }

    #[tokio::test]
    async fn get_doc_returns_snapshot() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/firestore/documents/products/sku-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "sku-1",
                "data": { "name": "Coffee beans", "stock": 12 }
            })))
            .mount(&server)
            .await;

        let snap = docs.get_doc(&doc("products/sku-1")).await.expect("get");
        assert!(snap.exists());
        assert_eq!(snap.id(), "sku-1");
        assert_eq!(snap.get("stock"), Some(&json!(12)));
    }

    #[tokio::test]
    async fn empty_payload_is_not_found() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/firestore/documents/staff/u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "", "data": {} })))
            .mount(&server)
            .await;

        let snap = docs.get_doc(&doc("staff/u1")).await.expect("get");
        assert!(!snap.exists());
        assert_eq!(snap, DocumentSnapshot::not_found());
    }

    #[tokio::test]
    async fn not_found_error_is_not_found_snapshot() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/firestore/documents/staff/u2"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "error": "Document not found" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/firestore/documents/staff/u3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(!docs.get_doc(&doc("staff/u2")).await.expect("get").exists());
        assert!(!docs.get_doc(&doc("staff/u3")).await.expect("get").exists());
    }

    #[tokio::test]
    async fn other_errors_propagate() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/firestore/documents/staff/u4"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "db offline" })))
            .mount(&server)
            .await;

        let err = docs.get_doc(&doc("staff/u4")).await.expect_err("should fail");
        assert_eq!(err.to_string(), "db offline");
    }

    #[tokio::test]
    async fn run_query_posts_descriptor() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/firestore/query"))
            .and(body_json(json!({
                "path": "products",
                "constraints": [
                    { "type": "where", "field": "stock", "op": "<", "value": 5 },
                    { "type": "orderBy", "field": "stock", "direction": "asc" },
                    { "type": "limit", "limit": 20 }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "a", "data": { "stock": 1 } },
                { "id": "b", "data": { "stock": 3 } }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let q = collection("products")
            .query()
            .where_("stock", WhereOp::LessThan, 5)
            .order_by("stock", Direction::Asc)
            .limit(20);
        let snap = docs.run_query(&q).await.expect("query");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.docs()[0].id(), "a");
    }

    #[tokio::test]
    async fn writes_use_document_endpoints() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/firestore/documents/products/sku-1"))
            .and(body_json(json!({ "data": { "price": 4.5 }, "merge": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/firestore/documents/products/sku-1"))
            .and(body_json(json!({ "data": { "stock": 9 } })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/firestore/documents/products/sku-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sku = doc("products/sku-1");
        docs.set_doc(&sku, json!({ "price": 4.5 }), true)
            .await
            .expect("set");
        docs.update_doc(&sku, json!({ "stock": 9 }))
            .await
            .expect("update");
        docs.delete_doc(&sku).await.expect("delete");
    }

    #[tokio::test]
    async fn add_doc_returns_new_reference() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/firestore/add/businesses/b1/sales"))
            .and(body_json(json!({ "data": { "total": 12.0 } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "sale-77" })))
            .expect(1)
            .mount(&server)
            .await;

        let sales = doc("businesses/b1").collection("sales");
        let created = docs
            .add_doc(&sales, json!({ "total": 12.0 }))
            .await
            .expect("add");
        assert_eq!(created.path(), "businesses/b1/sales/sale-77");
    }

    #[tokio::test]
    async fn non_object_data_is_rejected_before_io() {
        let server = MockServer::start().await;
        let docs = store(&server).await;
        let err = docs
            .set_doc(&doc("products/x"), json!([1, 2]), false)
            .await
            .expect_err("array data should fail");
        assert!(matches!(err, AdapterError::InvalidArgument(_)));
        assert!(server
            .received_requests()
            .await
            .expect("recorded requests")
            .is_empty());
    }
}
