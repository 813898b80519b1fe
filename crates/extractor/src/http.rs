//! Base API client with platform headers and per-request cookie material.
//!
//! The upstream rejects generic clients, so every request carries a
//! browser-mimicking user agent plus the platform referer/origin pair.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use tracing::debug;

use crate::credential::{Credential, cookie_header_or_baseline};
use crate::default::DEFAULT_UA;

pub const BASE_URL: &str = "https://www.bilibili.com";

/// Thin wrapper around a shared `reqwest::Client` that stamps the platform
/// headers onto every request.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    headers: HeaderMap,
}

impl ApiClient {
    pub fn new(client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
        headers.insert(reqwest::header::REFERER, HeaderValue::from_static(BASE_URL));
        headers.insert(reqwest::header::ORIGIN, HeaderValue::from_static(BASE_URL));
        Self { client, headers }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn get(&self, url: &str, credential: Option<&Credential>) -> RequestBuilder {
        self.request(Method::GET, url, credential)
    }

    /// Build a request carrying the platform headers and a Cookie header
    /// derived from the credential (or the anonymous baseline identity).
    pub fn request(
        &self,
        method: Method,
        url: &str,
        credential: Option<&Credential>,
    ) -> RequestBuilder {
        let mut headers = self.headers.clone();
        let cookie = cookie_header_or_baseline(credential);
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                headers.insert(reqwest::header::COOKIE, value);
            }
            Err(e) => {
                // Skip the Cookie header instead of sending an invalid value.
                debug!(error = %e, "Failed to build Cookie header");
            }
        }
        // API calls are small; bound them here rather than on the shared
        // client, which also carries long-running media transfers.
        self.client
            .request(method, url)
            .timeout(std::time::Duration::from_secs(30))
            .headers(headers)
    }
}
