//! S3-compatible object-store client.
//!
//! Handles AWS S3, Backblaze B2 and MinIO through the S3 REST API with
//! path-style addressing (`{endpoint}/{container}/{key}`). Uses reqwest with
//! manual AWS Signature V4 signing so no SDK dependency is needed.
//!
//! Uploads stream the payload and sign it as `UNSIGNED-PAYLOAD`; the length
//! is sent explicitly because the caller has already measured it.

use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use sha2::{Digest, Sha256};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info};

use bitstore_common::backend::{BlobMetadata, BlobReader, ObjectStoreClient};
use bitstore_common::error::ObjectStoreError;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct S3Config {
    pub endpoint: Option<String>, // Custom endpoint for B2, MinIO or other S3-compatible APIs
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct S3Client {
    config: S3Config,
    client: Client,
}

impl S3Client {
    pub fn new(config: S3Config) -> Result<Self, ObjectStoreError> {
        Ok(Self {
            config,
            client: Client::builder().build()?,
        })
    }

    fn endpoint(&self) -> String {
        match &self.config.endpoint {
            Some(ep) => ep.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.config.region),
        }
    }

    fn anonymous(&self) -> bool {
        self.config.access_key_id.is_empty() || self.config.secret_access_key.is_empty()
    }

    /// Build a request with SigV4 headers. `path` is the canonical URI
    /// (already percent-encoded, leading slash). `extra` headers are signed
    /// too and must use lowercase names.
    fn signed(
        &self,
        method: Method,
        path: &str,
        extra: &[(&str, String)],
        payload_hash: &str,
    ) -> RequestBuilder {
        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let endpoint = self.endpoint();
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), url_host(&endpoint));
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        headers.insert("x-amz-date".to_string(), date_time.clone());
        for (name, value) in extra {
            headers.insert(name.to_string(), value.clone());
        }

        let mut req = self
            .client
            .request(method.clone(), format!("{}{}", endpoint, path));
        for (name, value) in &headers {
            if name != "host" {
                req = req.header(name.as_str(), value.as_str());
            }
        }

        if self.anonymous() {
            return req;
        }
        let auth = self.sign(method.as_str(), path, "", &headers, payload_hash, &date_time, &date);
        req.header("Authorization", auth)
    }

    /// Compute AWS Signature V4 for a request.
    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        method: &str,
        path: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
        body_hash: &str,
        date_time: &str,
        date: &str,
    ) -> String {
        // Canonical request
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers: String = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, query, canonical_headers, signed_headers, body_hash
        );

        // String to sign
        let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time, credential_scope, cr_hash
        );

        let signing_key = derive_signing_key(
            &self.config.secret_access_key,
            date,
            &self.config.region,
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        )
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length ok");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn body_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn container_path(container: &str) -> String {
    format!("/{}", urlencoding::encode(container))
}

/// Path-style object URI. `/` inside keys stays literal so subfolders map
/// onto S3 prefixes.
fn object_path(container: &str, key: &str) -> String {
    let encoded_key = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", container_path(container), encoded_key)
}

/// Turn a non-success response into an error, pulling `<Code>` and
/// `<Message>` out of the S3 error document when there is one.
async fn status_error(resp: Response) -> ObjectStoreError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ObjectStoreError::Status {
        status,
        code: xml_tag(&body, "Code").unwrap_or_default(),
        message: xml_tag(&body, "Message").unwrap_or(body),
    }
}

#[async_trait]
impl ObjectStoreClient for S3Client {
    async fn container_exists(&self, container: &str) -> Result<bool, ObjectStoreError> {
        let resp = self
            .signed(Method::HEAD, &container_path(container), &[], &body_hash(b""))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(resp).await),
        }
    }

    async fn create_container(&self, container: &str) -> Result<(), ObjectStoreError> {
        // us-east-1 rejects an explicit location constraint.
        let body = if self.config.region == DEFAULT_REGION {
            String::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.config.region
            )
        };

        let extra = [("content-length", body.len().to_string())];
        let resp = self
            .signed(Method::PUT, &container_path(container), &extra, &body_hash(body.as_bytes()))
            .body(body)
            .send()
            .await?;

        if resp.status().is_success() {
            info!(container = %container, "Created container");
            return Ok(());
        }
        match status_error(resp).await {
            ObjectStoreError::Status { status: 409, code, .. } if code == "BucketAlreadyOwnedByYou" => {
                info!(container = %container, "Container already exists");
                Ok(())
            }
            err => Err(err),
        }
    }

    async fn get_blob(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<BlobReader>, ObjectStoreError> {
        let resp = self
            .signed(Method::GET, &object_path(container, key), &[], &body_hash(b""))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let stream = resp.bytes_stream().map_err(io::Error::other);
        let reader: BlobReader = Box::pin(StreamReader::new(stream));
        Ok(Some(reader))
    }

    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        payload: BlobReader,
        length: u64,
    ) -> Result<String, ObjectStoreError> {
        let extra = [
            ("content-length", length.to_string()),
            ("content-type", "application/octet-stream".to_string()),
        ];
        let body = reqwest::Body::wrap_stream(ReaderStream::new(payload));
        let resp = self
            .signed(Method::PUT, &object_path(container, key), &extra, UNSIGNED_PAYLOAD)
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let etag = header_str(resp.headers(), ETAG.as_str())
            .map(unquote_etag)
            .ok_or_else(|| ObjectStoreError::Malformed("PUT response has no ETag".to_string()))?;
        debug!(container = %container, key = %key, bytes = length, etag = %etag, "S3 upload complete");
        Ok(etag)
    }

    async fn blob_metadata(
        &self,
        container: &str,
        key: &str,
    ) -> Result<Option<BlobMetadata>, ObjectStoreError> {
        let resp = self
            .signed(Method::HEAD, &object_path(container, key), &[], &body_hash(b""))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        parse_metadata(resp.headers()).map(Some)
    }

    async fn remove_blob(&self, container: &str, key: &str) -> Result<(), ObjectStoreError> {
        let resp = self
            .signed(Method::DELETE, &object_path(container, key), &[], &body_hash(b""))
            .send()
            .await?;

        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(status_error(resp).await);
        }

        debug!(container = %container, key = %key, "S3 delete complete");
        Ok(())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Build metadata from HEAD response headers.
fn parse_metadata(headers: &HeaderMap) -> Result<BlobMetadata, ObjectStoreError> {
    let size = header_str(headers, CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| ObjectStoreError::Malformed("missing Content-Length".to_string()))?;
    let etag = header_str(headers, ETAG.as_str())
        .map(unquote_etag)
        .ok_or_else(|| ObjectStoreError::Malformed("missing ETag".to_string()))?;
    let last_modified = header_str(headers, LAST_MODIFIED.as_str())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ObjectStoreError::Malformed("missing or invalid Last-Modified".to_string()))?;
    Ok(BlobMetadata {
        size,
        etag,
        last_modified,
    })
}

/// S3 returns ETags as quoted strings.
fn unquote_etag(etag: &str) -> String {
    etag.trim().trim_matches('"').to_string()
}

/// Extract the text of the first `<tag>…</tag>` in an S3 XML document.
fn xml_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

/// Extract the host part from a URL for use in signing.
fn url_host(url: &str) -> String {
    // Strip scheme and path, return just host[:port]
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}
