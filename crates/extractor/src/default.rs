use reqwest::Client;
use reqwest::redirect::Policy;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Shared HTTP client: platform-verified TLS and bounded redirect
/// following (short links resolve in a handful of hops).
///
/// Timeouts are per connection attempt and per read, not per request.
/// The same client serves both small API calls and media transfers that
/// run for minutes, so a whole-request deadline would cut streams short;
/// callers that need one set it on the request or around the stream.
pub fn default_client() -> Client {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .expect("Failed to configure default TLS protocol versions")
        .with_platform_verifier()
        .unwrap()
        .with_no_client_auth();

    Client::builder()
        .use_preconfigured_tls(tls_config)
        .redirect(Policy::limited(5))
        .connect_timeout(std::time::Duration::from_secs(10))
        .read_timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("Failed to create HTTP client")
}
