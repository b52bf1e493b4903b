//! S3-compatible storage driver.
//!
//! Talks the S3 REST dialect directly over [`reqwest`]: HEAD for stat,
//! ListObjectsV2 for listings, PUT/GET/DELETE for objects, `?delete`
//! for batched removal, and SigV4 query presigning for URLs handed to
//! external clients. Works against AWS S3 and compatible servers
//! (MinIO, Ceph RGW, Garage) in either virtual-hosted or path-style
//! addressing.
//!
//! The driver performs no internal retry and keeps no state besides the
//! HTTP client: consistency masking is the entity layer's job.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use md5::{Digest as _, Md5};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::Method;
use url::Url;

use super::sigv4::{self, EMPTY_PAYLOAD_SHA256, Signer, UNSIGNED_PAYLOAD};
use super::{
    ByteStream, DriverCapabilities, ObjectKind, ObjectMetadata, PresignedUpload, StorageDriver,
    StorageItem, StorageStat,
};
use crate::config::{DiskConfig, Visibility};
use crate::error::{Error, Result, StorageOp};
use crate::path;

/// Bound on the virtual-directory existence probe. A timeout reports
/// "does not exist" rather than an error.
const DIR_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Page size for ListObjectsV2 requests.
const MAX_LIST_KEYS: usize = 1000;

/// DeleteObjects accepts at most 1000 keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

/// One page of a ListObjectsV2 response.
#[derive(Debug, Default)]
struct ListChunk {
    objects: Vec<RawObject>,
    prefixes: Vec<String>,
    next_token: Option<String>,
}

#[derive(Debug, Default)]
struct RawObject {
    key: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Driver for S3-compatible backends.
pub struct S3Driver {
    client: reqwest::Client,
    signer: Signer,
    bucket: String,
    /// Endpoint with the bucket already folded into the host for
    /// virtual-hosted addressing.
    base: Url,
    path_style: bool,
    create_bucket: bool,
    region: String,
    separator: char,
    public_base: Option<String>,
    default_visibility: Visibility,
}

// Manual impl: the signer holds credentials, which must never reach
// log output.
impl std::fmt::Debug for S3Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Driver")
            .field("bucket", &self.bucket)
            .field("base", &self.base.as_str())
            .field("path_style", &self.path_style)
            .field("region", &self.region)
            .finish()
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| Error::Configuration(format!("s3 disk requires option '{name}'")))
}

impl S3Driver {
    pub fn new(config: &DiskConfig) -> Result<Self> {
        let opts = &config.options;
        let bucket = required(&opts.bucket, "bucket")?;
        let endpoint = required(&opts.endpoint, "endpoint")?;
        let access_key = required(&opts.access_key, "access_key")?;
        let secret_key = required(&opts.secret_key, "secret_key")?;
        let region = opts.region.clone().unwrap_or_else(|| "us-east-1".into());

        let raw = if endpoint.contains("://") {
            endpoint
        } else {
            let scheme = if opts.use_tls { "https" } else { "http" };
            format!("{scheme}://{endpoint}")
        };
        let mut base =
            Url::parse(&raw).map_err(|e| Error::Configuration(format!("invalid endpoint: {e}")))?;
        if !opts.use_path_style {
            let host = base
                .host_str()
                .ok_or_else(|| Error::Configuration("endpoint has no host".into()))?
                .to_string();
            base.set_host(Some(&format!("{bucket}.{host}")))
                .map_err(|e| Error::Configuration(format!("invalid endpoint host: {e}")))?;
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            signer: Signer::new(access_key, secret_key, region.clone()),
            bucket,
            base,
            path_style: opts.use_path_style,
            create_bucket: opts.create_bucket,
            region,
            separator: config.separator,
            public_base: config.public_url.clone(),
            default_visibility: config.visibility,
        })
    }

    fn object_url(&self, key: &str) -> Url {
        let encoded = sigv4::encode_key_path(key);
        let mut url = self.base.clone();
        if self.path_style {
            url.set_path(&format!("/{}/{}", self.bucket, encoded));
        } else {
            url.set_path(&format!("/{encoded}"));
        }
        url
    }

    fn bucket_url(&self) -> Url {
        let mut url = self.base.clone();
        if self.path_style {
            url.set_path(&format!("/{}", self.bucket));
        } else {
            url.set_path("/");
        }
        url
    }

    /// Sign and dispatch one request. No retries.
    async fn send(
        &self,
        method: Method,
        url: Url,
        extra_headers: Vec<(String, String)>,
        payload_hash: &str,
        body: Option<reqwest::Body>,
        op: StorageOp,
        err_path: &str,
    ) -> Result<reqwest::Response> {
        let signed = self
            .signer
            .sign(method.as_str(), &url, &extra_headers, payload_hash, Utc::now());
        let mut request = self.client.request(method.clone(), url.clone());
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = request.header("authorization", signed.authorization.as_str());
        if let Some(body) = body {
            request = request.body(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::storage(op, err_path, e))?;
        tracing::debug!(
            method = %method,
            path = url.path(),
            status = response.status().as_u16(),
            "s3 request"
        );
        Ok(response)
    }

    fn check_status(response: &reqwest::Response, op: StorageOp, path: &str) -> Result<()> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::storage(
                op,
                path,
                format!("unexpected status {}", response.status()),
            ))
        }
    }

    /// Headers derived from upload metadata and the disk's default
    /// visibility.
    fn object_headers(&self, metadata: Option<&ObjectMetadata>) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        let visibility = metadata
            .and_then(|m| m.visibility)
            .unwrap_or(self.default_visibility);
        if visibility == Visibility::Public {
            headers.push(("x-amz-acl".to_string(), "public-read".to_string()));
        }
        if let Some(meta) = metadata {
            if let Some(content_type) = &meta.content_type {
                headers.push(("content-type".to_string(), content_type.clone()));
            }
            for (key, value) in &meta.custom {
                headers.push((format!("x-amz-meta-{key}"), value.clone()));
            }
        }
        headers
    }

    /// Fetch one ListObjectsV2 page.
    async fn list_chunk(
        &self,
        prefix: &str,
        delimiter: Option<char>,
        token: Option<&str>,
        max_keys: usize,
    ) -> Result<ListChunk> {
        let max_keys = max_keys.to_string();
        let delimiter = delimiter.map(|d| d.to_string());
        let mut pairs: Vec<(&str, &str)> = vec![
            ("list-type", "2"),
            ("max-keys", &max_keys),
            ("prefix", prefix),
        ];
        if let Some(d) = &delimiter {
            pairs.push(("delimiter", d));
        }
        if let Some(t) = token {
            pairs.push(("continuation-token", t));
        }
        let mut url = self.bucket_url();
        url.set_query(Some(&sigv4::query_string(&pairs)));

        let response = self
            .send(
                Method::GET,
                url,
                Vec::new(),
                EMPTY_PAYLOAD_SHA256,
                None,
                StorageOp::List,
                prefix,
            )
            .await?;
        Self::check_status(&response, StorageOp::List, prefix)?;
        let body = response
            .text()
            .await
            .map_err(|e| Error::storage(StorageOp::List, prefix, e))?;
        parse_list_xml(&body)
    }

    fn build_delete_body(keys: &[String]) -> String {
        let mut xml =
            String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Delete><Quiet>true</Quiet>"#);
        for key in keys {
            xml.push_str("<Object><Key>");
            xml.push_str(&quick_xml::escape::escape(key.as_str()));
            xml.push_str("</Key></Object>");
        }
        xml.push_str("</Delete>");
        xml
    }
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            presigned_urls: true,
            public_urls: true,
            server_side_copy: true,
            batch_delete: true,
        }
    }

    /// HEAD the bucket; create it when absent and the config opts in.
    async fn ensure_ready(&self) -> Result<()> {
        let response = self
            .send(
                Method::HEAD,
                self.bucket_url(),
                Vec::new(),
                EMPTY_PAYLOAD_SHA256,
                None,
                StorageOp::Provision,
                &self.bucket,
            )
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != reqwest::StatusCode::NOT_FOUND || !self.create_bucket {
            return Err(Error::storage(
                StorageOp::Provision,
                &self.bucket,
                format!("bucket probe returned {}", response.status()),
            ));
        }

        // us-east-1 is the implied default and must not be named in the
        // location constraint.
        let body = if self.region == "us-east-1" {
            Bytes::new()
        } else {
            Bytes::from(format!(
                "<CreateBucketConfiguration><LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.region
            ))
        };
        let payload_hash = sigv4::sha256_hex(&body);
        let response = self
            .send(
                Method::PUT,
                self.bucket_url(),
                Vec::new(),
                &payload_hash,
                Some(reqwest::Body::from(body)),
                StorageOp::Provision,
                &self.bucket,
            )
            .await?;
        Self::check_status(&response, StorageOp::Provision, &self.bucket)
    }

    async fn stat(&self, key: &str) -> Result<StorageStat> {
        // Exact key first: file semantics in one HEAD.
        if !key.is_empty() {
            let response = self
                .send(
                    Method::HEAD,
                    self.object_url(key),
                    Vec::new(),
                    EMPTY_PAYLOAD_SHA256,
                    None,
                    StorageOp::Metadata,
                    key,
                )
                .await?;
            if response.status().is_success() {
                let size = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let modified = response
                    .headers()
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                    .map(|dt| dt.with_timezone(&Utc));
                return Ok(StorageStat {
                    kind: ObjectKind::File,
                    size,
                    modified,
                });
            }
            if response.status() != reqwest::StatusCode::NOT_FOUND {
                return Err(Error::storage(
                    StorageOp::Metadata,
                    key,
                    format!("unexpected status {}", response.status()),
                ));
            }
        }

        // Second probe: one bounded listing call with a stop-at-first-
        // match policy. Any key under `key/` proves a virtual directory.
        let prefix = path::directory_key(key, self.separator);
        let probe = self.list_chunk(&prefix, None, None, 1);
        match tokio::time::timeout(DIR_PROBE_TIMEOUT, probe).await {
            Err(_elapsed) => Ok(StorageStat::missing()),
            Ok(chunk) => {
                let chunk = chunk?;
                if chunk.objects.is_empty() && chunk.prefixes.is_empty() {
                    Ok(StorageStat::missing())
                } else {
                    Ok(StorageStat {
                        kind: ObjectKind::Directory,
                        size: 0,
                        modified: None,
                    })
                }
            }
        }
    }

    fn list(&self, prefix: &str, recursive: bool) -> BoxStream<'_, Result<StorageItem>> {
        struct Cursor {
            prefix: String,
            recursive: bool,
            buffered: VecDeque<StorageItem>,
            token: Option<String>,
            exhausted: bool,
            announced: HashSet<String>,
        }

        let cursor = Cursor {
            prefix: prefix.to_string(),
            recursive,
            buffered: VecDeque::new(),
            token: None,
            exhausted: false,
            announced: HashSet::new(),
        };
        let sep = self.separator;

        Box::pin(futures_util::stream::try_unfold(cursor, move |mut cur| {
            let this = self;
            async move {
                loop {
                    if let Some(item) = cur.buffered.pop_front() {
                        return Ok(Some((item, cur)));
                    }
                    if cur.exhausted {
                        return Ok(None);
                    }

                    let delimiter = if cur.recursive { None } else { Some(sep) };
                    let token = cur.token.take();
                    let chunk = this
                        .list_chunk(&cur.prefix, delimiter, token.as_deref(), MAX_LIST_KEYS)
                        .await?;

                    for common in chunk.prefixes {
                        let rel = path::relative_to(&common, &cur.prefix, sep)
                            .trim_end_matches(sep)
                            .to_string();
                        if !rel.is_empty() {
                            cur.buffered.push_back(StorageItem::directory(rel));
                        }
                    }
                    for object in chunk.objects {
                        let rel = path::relative_to(&object.key, &cur.prefix, sep).to_string();
                        // Skip the prefix itself and directory markers.
                        if rel.is_empty() || rel.ends_with(sep) {
                            continue;
                        }
                        if cur.recursive {
                            // Announce each virtual directory once,
                            // before the first file beneath it.
                            if let Some((dirs, _file)) = rel.rsplit_once(sep) {
                                let mut acc = String::new();
                                for segment in dirs.split(sep) {
                                    if !acc.is_empty() {
                                        acc.push(sep);
                                    }
                                    acc.push_str(segment);
                                    if cur.announced.insert(acc.clone()) {
                                        cur.buffered.push_back(StorageItem::directory(acc.clone()));
                                    }
                                }
                            }
                        }
                        cur.buffered.push_back(StorageItem::file(
                            rel,
                            Some(object.size),
                            object.modified,
                        ));
                    }

                    match chunk.next_token {
                        Some(token) => cur.token = Some(token),
                        None => cur.exhausted = true,
                    }
                }
            }
        }))
    }

    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        let payload_hash = sigv4::sha256_hex(&body);
        let response = self
            .send(
                Method::PUT,
                self.object_url(key),
                self.object_headers(metadata),
                &payload_hash,
                Some(reqwest::Body::from(body)),
                StorageOp::Write,
                key,
            )
            .await?;
        Self::check_status(&response, StorageOp::Write, key)
    }

    async fn upload_stream(
        &self,
        key: &str,
        body: ByteStream,
        _length: Option<u64>,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        // Streamed bodies go up chunked and unsigned; the TLS layer is
        // the integrity boundary.
        let response = self
            .send(
                Method::PUT,
                self.object_url(key),
                self.object_headers(metadata),
                UNSIGNED_PAYLOAD,
                Some(reqwest::Body::wrap_stream(body)),
                StorageOp::Write,
                key,
            )
            .await?;
        Self::check_status(&response, StorageOp::Write, key)
    }

    async fn download(&self, key: &str) -> Result<ByteStream> {
        let response = self
            .send(
                Method::GET,
                self.object_url(key),
                Vec::new(),
                EMPTY_PAYLOAD_SHA256,
                None,
                StorageOp::Read,
                key,
            )
            .await?;
        Self::check_status(&response, StorageOp::Read, key)?;
        let err_key = key.to_string();
        Ok(response
            .bytes_stream()
            .map_err(move |e| Error::storage(StorageOp::Read, err_key.clone(), e))
            .boxed())
    }

    async fn download_range(
        &self,
        key: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<ByteStream> {
        if start.is_none() && end.is_none() {
            return self.download(key).await;
        }
        let range = format!(
            "bytes={}-{}",
            start.unwrap_or(0),
            end.map(|e| e.to_string()).unwrap_or_default()
        );
        let response = self
            .send(
                Method::GET,
                self.object_url(key),
                vec![("range".to_string(), range)],
                EMPTY_PAYLOAD_SHA256,
                None,
                StorageOp::Read,
                key,
            )
            .await?;
        Self::check_status(&response, StorageOp::Read, key)?;
        let err_key = key.to_string();
        Ok(response
            .bytes_stream()
            .map_err(move |e| Error::storage(StorageOp::Read, err_key.clone(), e))
            .boxed())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .send(
                Method::DELETE,
                self.object_url(key),
                Vec::new(),
                EMPTY_PAYLOAD_SHA256,
                None,
                StorageOp::Delete,
                key,
            )
            .await?;
        Self::check_status(&response, StorageOp::Delete, key)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let body = Bytes::from(Self::build_delete_body(batch));
            let payload_hash = sigv4::sha256_hex(&body);
            let content_md5 = BASE64.encode(Md5::digest(&body));
            let mut url = self.bucket_url();
            url.set_query(Some("delete="));

            let response = self
                .send(
                    Method::POST,
                    url,
                    vec![("content-md5".to_string(), content_md5)],
                    &payload_hash,
                    Some(reqwest::Body::from(body)),
                    StorageOp::Delete,
                    "(batch)",
                )
                .await?;
            Self::check_status(&response, StorageOp::Delete, "(batch)")?;
            let text = response
                .text()
                .await
                .map_err(|e| Error::storage(StorageOp::Delete, "(batch)", e))?;
            if text.contains("<Error>") {
                return Err(Error::storage(
                    StorageOp::Delete,
                    "(batch)",
                    "backend reported per-key delete errors",
                ));
            }
        }
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let source = format!("/{}/{}", self.bucket, sigv4::encode_key_path(from));
        let response = self
            .send(
                Method::PUT,
                self.object_url(to),
                vec![("x-amz-copy-source".to_string(), source)],
                EMPTY_PAYLOAD_SHA256,
                None,
                StorageOp::Copy,
                from,
            )
            .await?;
        Self::check_status(&response, StorageOp::Copy, from)?;
        // CopyObject can fail after committing a 200 status line.
        let text = response
            .text()
            .await
            .map_err(|e| Error::storage(StorageOp::Copy, from, e))?;
        if text.contains("<Error>") {
            return Err(Error::storage(
                StorageOp::Copy,
                from,
                "backend reported a copy error",
            ));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> Option<String> {
        let encoded = sigv4::encode_key_path(key);
        match &self.public_base {
            Some(base) => Some(format!("{}/{encoded}", base.trim_end_matches('/'))),
            None => Some(self.object_url(key).to_string()),
        }
    }

    fn presign_download(&self, key: &str, expires_in: Duration) -> Result<Option<String>> {
        if expires_in.as_secs() == 0 {
            return Err(Error::Configuration(
                "presign expiry must be positive".into(),
            ));
        }
        let url = self
            .signer
            .presign("GET", &self.object_url(key), expires_in.as_secs(), Utc::now());
        Ok(Some(url.to_string()))
    }

    fn presign_upload(
        &self,
        key: &str,
        expires_in: Duration,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<Option<PresignedUpload>> {
        if expires_in.as_secs() == 0 {
            return Err(Error::Configuration(
                "presign expiry must be positive".into(),
            ));
        }
        let url = self
            .signer
            .presign("PUT", &self.object_url(key), expires_in.as_secs(), Utc::now());
        // Only `host` is signed, so these headers are advisory: the
        // client should send them, the signature does not pin them.
        let headers = self.object_headers(metadata).into_iter().collect();
        Ok(Some(PresignedUpload {
            url: url.to_string(),
            headers,
            fields: std::collections::HashMap::new(),
        }))
    }
}

fn parse_list_xml(xml: &str) -> Result<ListChunk> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut chunk = ListChunk::default();
    let mut current = RawObject::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "Contents" {
                    current = RawObject::default();
                }
                stack.push(name);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| list_parse_error(&e))?
                    .trim()
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                let in_contents = stack.iter().any(|n| n == "Contents");
                let in_common = stack.iter().any(|n| n == "CommonPrefixes");
                match stack.last().map(String::as_str) {
                    Some("Key") if in_contents => current.key = text,
                    Some("Size") if in_contents => {
                        current.size = text.parse().unwrap_or_default();
                    }
                    Some("LastModified") if in_contents => {
                        current.modified = DateTime::parse_from_rfc3339(&text)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc));
                    }
                    Some("Prefix") if in_common => chunk.prefixes.push(text),
                    Some("NextContinuationToken") => chunk.next_token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if stack.pop().as_deref() == Some("Contents") {
                    chunk.objects.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(list_parse_error(&e)),
        }
    }
    Ok(chunk)
}

fn list_parse_error(err: &dyn std::fmt::Display) -> Error {
    Error::storage(
        StorageOp::List,
        "(list)",
        format!("invalid list response: {err}"),
    )
}
