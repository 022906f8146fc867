//! Backend file storage: uploads and download URLs.

use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::api::{ApiClient, FileUpload, RequestBody};
use crate::error::{AdapterError, Result};
use crate::query::{clean_path, encode_path};

#[derive(Deserialize)]
struct UrlResponse {
    url: Option<String>,
}

impl UrlResponse {
    fn into_url(self, op: &str) -> Result<String> {
        self.url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AdapterError::InvalidResponse(format!("{op} response without url")))
    }
}

#[derive(Clone)]
pub struct Files {
    client: Arc<ApiClient>,
}

impl Files {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Upload `bytes` to `path` and return the stored file's URL.
    pub async fn upload(
        &self,
        path: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let path = clean_path(path);
        if path.is_empty() {
            return Err(AdapterError::InvalidArgument("upload: empty storage path".into()));
        }
        let size = bytes.len();
        let upload = FileUpload {
            path: path.clone(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        };
        let resp: UrlResponse = self
            .client
            .fetch_api(Method::POST, "/storage/upload", RequestBody::Multipart(upload))
            .await?;
        let url = resp.into_url("upload")?;
        info!(path = %path, bytes = size, "file uploaded");
        Ok(url)
    }

    pub async fn download_url(&self, path: &str) -> Result<String> {
        let resp: UrlResponse = self
            .client
            .fetch_api(
                Method::GET,
                &format!("/storage/files/{}", encode_path(path)),
                RequestBody::Empty,
            )
            .await?;
        resp.into_url("download")
    }
}
