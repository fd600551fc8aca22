//! Cloud object metadata clients
//!
//! The cloud backend talks to object storage only through
//! [`ObjectMetadataClient`]: fetch one object's whole metadata dictionary, or
//! replace it in one call. [`BlobMetadataClient`] speaks the Azure Blob REST
//! dialect (`?comp=metadata`, `x-ms-meta-*` headers).

use crate::error::{AttrError, Result};
use crate::types::ItemPath;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{StatusCode, Url};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Raw metadata dictionary of one object, exactly as the service returns it.
pub type MetadataMap = BTreeMap<String, String>;

const METADATA_HEADER_PREFIX: &str = "x-ms-meta-";
const API_VERSION_HEADER: &str = "x-ms-version";
const API_VERSION: &str = "2021-08-06";

#[async_trait]
pub trait ObjectMetadataClient: Send + Sync {
    /// `None` when the object does not exist.
    async fn fetch_metadata(&self, object: &ItemPath) -> Result<Option<MetadataMap>>;

    /// Replace the whole dictionary. `TargetMissing` when the object does not
    /// exist.
    async fn replace_metadata(&self, object: &ItemPath, metadata: &MetadataMap) -> Result<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Azure Blob compatible metadata client.
pub struct BlobMetadataClient {
    http: reqwest::Client,
    endpoint: Url,
    container: String,
    sas_token: Option<String>,
}

impl BlobMetadataClient {
    /// `endpoint` is the account URL, e.g. `https://acct.blob.core.windows.net`.
    pub fn new(
        endpoint: &str,
        container: &str,
        sas_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| AttrError::Config(format!("Invalid cloud endpoint {:?}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(AttrError::Config(format!(
                "Cloud endpoint {} cannot carry a blob path",
                endpoint
            )));
        }
        if container.is_empty() {
            return Err(AttrError::Config("Cloud container must not be empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AttrError::backend("Failed to build HTTP client", e))?;
        Ok(Self {
            http,
            endpoint,
            container: container.to_string(),
            sas_token: sas_token.filter(|token| !token.trim_start_matches('?').is_empty()),
        })
    }

    /// Default public endpoint of a storage account.
    pub fn account_endpoint(account: &str) -> String {
        format!("https://{}.blob.core.windows.net", account)
    }

    fn metadata_url(&self, object: &ItemPath) -> Result<Url> {
        if object.is_root() {
            return Err(AttrError::invalid_path(
                "/",
                "the container root is not a cloud object",
            ));
        }
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                AttrError::Config(format!("Cloud endpoint {} cannot carry a blob path", self.endpoint))
            })?;
            segments.pop_if_empty();
            segments.push(&self.container);
            for segment in object.segments() {
                segments.push(segment);
            }
        }
        let mut query = String::from("comp=metadata");
        if let Some(token) = &self.sas_token {
            query.push('&');
            query.push_str(token.trim_start_matches('?'));
        }
        url.set_query(Some(&query));
        Ok(url)
    }
}

#[async_trait]
impl ObjectMetadataClient for BlobMetadataClient {
    async fn fetch_metadata(&self, object: &ItemPath) -> Result<Option<MetadataMap>> {
        let url = self.metadata_url(object)?;
        let response = self
            .http
            .get(url)
            .header(API_VERSION_HEADER, API_VERSION)
            .send()
            .await
            .map_err(|e| AttrError::backend(format!("Failed to fetch metadata of {}", object), e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Cloud object {} not found", object);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error("fetch metadata of", object, status));
        }

        Ok(Some(metadata_from_headers(response.headers(), object)?))
    }

    async fn replace_metadata(&self, object: &ItemPath, metadata: &MetadataMap) -> Result<()> {
        let url = self.metadata_url(object)?;
        let mut request = self
            .http
            .put(url)
            .header(API_VERSION_HEADER, API_VERSION)
            .header(CONTENT_LENGTH, 0);
        for (key, value) in metadata {
            let header = format!("{}{}", METADATA_HEADER_PREFIX, key);
            let name = HeaderName::from_bytes(header.as_bytes()).map_err(|e| {
                AttrError::backend(format!("Metadata key {:?} is not a header name", key), e)
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                AttrError::backend(format!("Metadata value of {:?} is not a header value", key), e)
            })?;
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttrError::backend(format!("Failed to replace metadata of {}", object), e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AttrError::target_missing(object));
        }
        if !status.is_success() {
            return Err(status_error("replace metadata of", object, status));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), self.container)
    }
}

fn metadata_from_headers(headers: &HeaderMap, object: &ItemPath) -> Result<MetadataMap> {
    let mut metadata = MetadataMap::new();
    for (name, value) in headers {
        let Some(key) = name.as_str().strip_prefix(METADATA_HEADER_PREFIX) else {
            continue;
        };
        let value = value.to_str().map_err(|e| {
            AttrError::backend(format!("Metadata {:?} of {} is not ASCII", key, object), e)
        })?;
        metadata.insert(key.to_string(), value.to_string());
    }
    Ok(metadata)
}

fn status_error(operation: &str, object: &ItemPath, status: StatusCode) -> AttrError {
    AttrError::backend(
        format!("Failed to {} {}", operation, object),
        format!("service answered {}", status),
    )
}
