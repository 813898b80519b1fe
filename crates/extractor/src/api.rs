//! Signed API call plumbing shared by the resolver and the negotiator.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

use crate::credential::Credential;
use crate::error::ExtractorError;
use crate::http::ApiClient;
use crate::keys::KeyCache;
use crate::signer::sign;

/// Signed-request front door to the upstream APIs.
#[derive(Clone)]
pub struct SignedApi {
    api: ApiClient,
    keys: Arc<KeyCache>,
}

impl SignedApi {
    pub fn new(api: ApiClient, keys: Arc<KeyCache>) -> Self {
        Self { api, keys }
    }

    pub fn http(&self) -> &ApiClient {
        &self.api
    }

    /// Issue a signed GET and unwrap the response envelope.
    ///
    /// A non-zero business code maps to `UpstreamRejected`; transport
    /// failures map to `UpstreamUnavailable`.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
        credential: Option<&Credential>,
    ) -> Result<T, ExtractorError> {
        let keys = self.keys.get(credential).await;
        let query = sign(params, Some(&keys));
        self.request(endpoint, &query, credential).await
    }

    /// Issue an unsigned GET for endpoints that tolerate plain calls.
    pub async fn get_json_unsigned<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&str, String)>,
        credential: Option<&Credential>,
    ) -> Result<T, ExtractorError> {
        let query = sign(params, None);
        self.request(endpoint, &query, credential).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &str,
        credential: Option<&Credential>,
    ) -> Result<T, ExtractorError> {
        let url = format!("{endpoint}?{query}");
        debug!(url = %url, "signed api request");

        let resp: crate::models::ApiResponse<T> =
            self.api.get(&url, credential).send().await?.json().await?;

        if resp.code != 0 {
            return Err(ExtractorError::rejected(resp.code, resp.message));
        }
        resp.data
            .ok_or_else(|| ExtractorError::rejected(resp.code, "empty response payload"))
    }
}
