//! Google Cloud Storage JSON API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{validate_key, ObjectStore, StorageError};

/// Default GCS JSON API root
pub const DEFAULT_GCS_URL: &str = "https://storage.googleapis.com";

/// HTTP request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on rewrite round-trips for one rename
const MAX_REWRITE_CALLS: usize = 20;

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectItem>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectItem {
    name: String,
}

#[derive(Deserialize)]
struct RewriteResponse {
    #[serde(default)]
    done: bool,
    #[serde(default, rename = "rewriteToken")]
    rewrite_token: Option<String>,
}

pub struct GcsObjectStore {
    http_client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl GcsObjectStore {
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self, StorageError> {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Backend(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.base_url,
            urlencoding::encode(bucket),
            urlencoding::encode(key)
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        bucket: &str,
        key: &str,
    ) -> Result<reqwest::Response, StorageError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to reach object storage: {}", e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 => StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            401 | 403 => StorageError::PermissionDenied {
                bucket: bucket.to_string(),
                message: body,
            },
            code => StorageError::Backend(format!("HTTP {} for {}/{}: {}", code, bucket, key, body)),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.base_url,
            urlencoding::encode(bucket)
        );
        let req = self
            .http_client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes);
        self.send(req, bucket, key).await?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let url = format!("{}/storage/v1/b/{}/o", self.base_url, urlencoding::encode(bucket));
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.http_client.get(&url).query(&[("prefix", prefix)]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let page: ListResponse = self
                .send(req, bucket, prefix)
                .await?
                .json()
                .await
                .map_err(|e| StorageError::Backend(format!("Invalid list response: {}", e)))?;
            keys.extend(page.items.into_iter().map(|item| item.name));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let req = self
            .http_client
            .get(self.object_url(bucket, key))
            .query(&[("alt", "media")]);
        let bytes = self
            .send(req, bucket, key)
            .await?
            .bytes()
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read {}/{}: {}", bucket, key, e)))?;
        Ok(bytes.to_vec())
    }

    /// GCS has no rename: rewrite to the new key, then delete the old one.
    async fn rename(&self, bucket: &str, old_key: &str, new_key: &str) -> Result<(), StorageError> {
        validate_key(new_key)?;
        let url = format!(
            "{}/rewriteTo/b/{}/o/{}",
            self.object_url(bucket, old_key),
            urlencoding::encode(bucket),
            urlencoding::encode(new_key)
        );

        let mut rewrite_token: Option<String> = None;
        let mut finished = false;
        for _ in 0..MAX_REWRITE_CALLS {
            let mut req = self.http_client.post(&url);
            if let Some(token) = &rewrite_token {
                req = req.query(&[("rewriteToken", token.as_str())]);
            }
            let resp: RewriteResponse = self
                .send(req, bucket, old_key)
                .await?
                .json()
                .await
                .map_err(|e| StorageError::Backend(format!("Invalid rewrite response: {}", e)))?;
            if resp.done {
                finished = true;
                break;
            }
            rewrite_token = resp.rewrite_token;
        }
        if !finished {
            return Err(StorageError::Backend(format!(
                "rewrite of {}/{} did not finish",
                bucket, old_key
            )));
        }

        self.delete(bucket, old_key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let req = self.http_client.delete(self.object_url(bucket, key));
        self.send(req, bucket, key).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "gcs"
    }
}
