//! Minimal S3 client: path-style GET/PUT/DELETE/ListObjectsV2 signed with
//! AWS Signature Version 4.

use super::object_store::StoreError;
use crate::config::StorageConfig;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Method;
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<Key>([^<]*)</Key>").expect("static regex"));
static TRUNCATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<IsTruncated>(true|false)</IsTruncated>").expect("static regex"));
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<NextContinuationToken>([^<]*)</NextContinuationToken>").expect("static regex")
});

#[derive(Clone)]
pub struct S3Store {
    http: reqwest::Client,
    origin: String,
    authority: String,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

/// One page of a ListObjectsV2 response.
#[derive(Debug, Default, PartialEq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

struct SignedRequest {
    url: String,
    headers: Vec<(String, String)>,
}

impl S3Store {
    pub fn new(config: &StorageConfig) -> Result<Self, StoreError> {
        if config.bucket.is_empty() {
            return Err(StoreError::Config("bucket is not set".to_string()));
        }
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        let access_key = config
            .access_key_id
            .clone()
            .ok_or_else(|| StoreError::Config("access key id is not set".to_string()))?;
        let secret_key = config
            .secret_access_key
            .clone()
            .ok_or_else(|| StoreError::Config("secret access key is not set".to_string()))?;

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{region}.amazonaws.com"));
        let parsed = url::Url::parse(&endpoint)
            .map_err(|e| StoreError::Config(format!("invalid endpoint {endpoint}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| StoreError::Config(format!("endpoint has no host: {endpoint}")))?;
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let origin = format!("{}://{}", parsed.scheme(), authority);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            origin,
            authority,
            bucket: config.bucket.clone(),
            region,
            access_key,
            secret_key,
            session_token: config.session_token.clone(),
        })
    }

    fn object_uri(&self, key: &str) -> String {
        let encoded: Vec<String> = key.split('/').map(uri_encode).collect();
        format!("/{}/{}", uri_encode(&self.bucket), encoded.join("/"))
    }

    fn sign(
        &self,
        method: &Method,
        canonical_uri: &str,
        query: &[(&str, String)],
        body: &[u8],
        now: chrono::DateTime<chrono::Utc>,
    ) -> SignedRequest {
        let payload_hash = hex::encode(Sha256::digest(body));
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let canonical_query = canonical_query_string(query);

        let mut headers = vec![
            ("host".to_string(), self.authority.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(token) = &self.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_query,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let signing_key = derive_signing_key(&self.secret_key, &date_stamp, &self.region, "s3");
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        headers.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                self.access_key, credential_scope, signed_headers, signature
            ),
        ));
        // Host is taken from the URL.
        headers.retain(|(name, _)| name != "host");

        let mut url = format!("{}{}", self.origin, canonical_uri);
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }
        SignedRequest { url, headers }
    }

    async fn send(
        &self,
        method: Method,
        canonical_uri: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response, StoreError> {
        let signed = self.sign(&method, canonical_uri, query, &body, chrono::Utc::now());
        let mut request = self.http.request(method, signed.url.as_str());
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(ct) = content_type {
            request = request.header(reqwest::header::CONTENT_TYPE, ct);
        }
        Ok(request.body(body).send().await?)
    }

    async fn status_error(key: &str, resp: reqwest::Response) -> StoreError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        StoreError::Status {
            status,
            key: key.to_string(),
            body: body.chars().take(300).collect(),
        }
    }

    pub async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        let uri = self.object_uri(key);
        let resp = self
            .send(Method::PUT, &uri, &[], body, Some(content_type))
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(key, resp).await)
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let uri = self.object_uri(key);
        let resp = self.send(Method::GET, &uri, &[], Vec::new(), None).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::status_error(key, resp).await);
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let uri = self.object_uri(key);
        let resp = self
            .send(Method::DELETE, &uri, &[], Vec::new(), None)
            .await?;
        if resp.status().is_success() || resp.status() == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(Self::status_error(key, resp).await)
        }
    }

    pub async fn list_page(
        &self,
        prefix: &str,
        token: Option<&str>,
        max_keys: u32,
    ) -> Result<ListPage, StoreError> {
        let uri = format!("/{}", uri_encode(&self.bucket));
        let mut query = vec![
            ("list-type", "2".to_string()),
            ("max-keys", max_keys.to_string()),
            ("prefix", prefix.to_string()),
        ];
        if let Some(token) = token {
            query.push(("continuation-token", token.to_string()));
        }
        let resp = self.send(Method::GET, &uri, &query, Vec::new(), None).await?;
        if !resp.status().is_success() {
            return Err(Self::status_error(prefix, resp).await);
        }
        let xml = resp.text().await?;
        Ok(parse_list_response(&xml))
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(prefix, token.as_deref(), 1000).await?;
            keys.extend(page.keys);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }
}

pub fn parse_list_response(xml: &str) -> ListPage {
    let keys = KEY_RE
        .captures_iter(xml)
        .map(|c| xml_unescape(&c[1]))
        .collect();
    let truncated = TRUNCATED_RE
        .captures(xml)
        .is_some_and(|c| &c[1] == "true");
    let next_token = if truncated {
        TOKEN_RE.captures(xml).map(|c| xml_unescape(&c[1]))
    } else {
        None
    };
    ListPage { keys, next_token }
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn canonical_query_string(query: &[(&str, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// RFC 3986 encoding as required by SigV4: everything but unreserved bytes.
pub fn uri_encode(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for &byte in segment.as_bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
