//! Upstream API client for bilibili asset resolution and playback
//! negotiation.
//!
//! The crate covers the read-only half of a download pipeline: turning
//! messy user input into a canonical asset identity, fetching metadata,
//! maintaining the signing key cache, and negotiating a playback manifest
//! through a chain of endpoint variants. Byte transfer and muxing live in
//! the application crate.

pub mod api;
pub mod credential;
pub mod default;
pub mod error;
pub mod http;
pub mod keys;
pub mod models;
pub mod playback;
pub mod quality;
pub mod resolver;
pub mod signer;

pub use api::SignedApi;
pub use credential::Credential;
pub use default::{DEFAULT_UA, default_client};
pub use error::ExtractorError;
pub use http::ApiClient;
pub use keys::{KeyCache, WbiKeys};
pub use playback::{
    AudioStream, PlaybackManifest, PlaybackNegotiator, PlaybackStrategy, VideoStream,
};
pub use quality::{DEFAULT_TIER, QualityTier, TOP_TIER, TierAvailability};
pub use resolver::{AssetId, AssetIdentity, AssetMetadata, AssetPart, AssetResolver};
