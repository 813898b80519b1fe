//! Playback manifest negotiation.
//!
//! The upstream exposes several near-duplicate playback endpoints, each with
//! different auth tricks and grant behavior. Negotiation walks an ordered
//! strategy chain and stops at the first manifest containing at least one
//! video stream. Every strategy asks for the top tier regardless of what the
//! caller wants; the upstream answers with the full set of tiers it is
//! willing to grant, and selection happens from the returned set. This
//! empirically maximizes manifest richness but is a heuristic, not a
//! documented contract.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::api::SignedApi;
use crate::credential::Credential;
use crate::error::ExtractorError;
use crate::models::{Dash, PlayData};
use crate::quality::{QualityTier, TOP_TIER, TierAvailability, availability_table, select_tier};
use crate::resolver::AssetIdentity;

const PLAYURL_WBI: &str = "https://api.bilibili.com/x/player/wbi/playurl";
const PLAYURL_LEGACY: &str = "https://api.bilibili.com/x/player/playurl";

/// DASH feature mask: split streams + HDR + 4K + AV1 + 8K.
const FNVAL_DASH_FULL: u32 = 4048;

/// One elementary video rendition from a manifest.
#[derive(Debug, Clone)]
pub struct VideoStream {
    pub tier: QualityTier,
    pub bandwidth: u64,
    pub codecs: String,
    pub url: String,
}

/// One elementary audio rendition. The first entry is the upstream's
/// preferred (highest-quality) rendition.
#[derive(Debug, Clone)]
pub struct AudioStream {
    pub bandwidth: u64,
    pub url: String,
}

/// Ephemeral set of elementary stream URLs for one playback request.
/// Segment URLs carry a short upstream-defined TTL; never persist this.
#[derive(Debug, Clone, Default)]
pub struct PlaybackManifest {
    pub videos: Vec<VideoStream>,
    pub audios: Vec<AudioStream>,
}

impl PlaybackManifest {
    /// Distinct tiers actually present, ascending.
    pub fn tiers_present(&self) -> Vec<QualityTier> {
        let mut tiers: Vec<QualityTier> = self.videos.iter().map(|v| v.tier).collect();
        tiers.sort();
        tiers.dedup();
        tiers
    }

    /// Pick the concrete video stream for a requested tier, applying the
    /// tier tie-break rules and preferring the highest-bandwidth rendition
    /// within the chosen tier.
    pub fn select_video(&self, requested: QualityTier) -> Option<&VideoStream> {
        let tier = select_tier(&self.tiers_present(), requested)?;
        self.videos
            .iter()
            .filter(|v| v.tier == tier)
            .max_by_key(|v| v.bandwidth)
    }

    /// The upstream's preferred audio rendition, when any exists.
    pub fn best_audio(&self) -> Option<&AudioStream> {
        self.audios.first()
    }

    pub fn availability(&self, requested_max: QualityTier) -> Vec<TierAvailability> {
        availability_table(&self.tiers_present(), requested_max)
    }

    fn from_dash(dash: Dash) -> Self {
        // Keep one rendition per (tier, codec); upstream repeats entries.
        let mut seen: FxHashMap<(u32, String), VideoStream> = FxHashMap::default();
        for v in dash.video {
            let key = (v.id, v.codecs.clone());
            let candidate = VideoStream {
                tier: QualityTier(v.id),
                bandwidth: v.bandwidth,
                codecs: v.codecs,
                url: v.base_url,
            };
            match seen.get(&key) {
                Some(existing) if existing.bandwidth >= candidate.bandwidth => {}
                _ => {
                    seen.insert(key, candidate);
                }
            }
        }
        let mut videos: Vec<VideoStream> = seen.into_values().collect();
        videos.sort_by(|a, b| b.tier.cmp(&a.tier).then(b.bandwidth.cmp(&a.bandwidth)));

        let audios = dash
            .audio
            .into_iter()
            .map(|a| AudioStream {
                bandwidth: a.bandwidth,
                url: a.base_url,
            })
            .collect();

        Self { videos, audios }
    }
}

/// Request context handed to each negotiation strategy.
pub struct NegotiationRequest<'a> {
    pub identity: &'a AssetIdentity,
    pub stream_cid: u64,
    pub credential: Option<&'a Credential>,
}

/// One upstream playback endpoint variant.
///
/// `Ok(None)` means "not applicable or nothing granted, try the next one";
/// an error that `is_fallthrough()` likewise moves the chain along.
#[async_trait]
pub trait PlaybackStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn try_negotiate(
        &self,
        request: &NegotiationRequest<'_>,
    ) -> Result<Option<PlaybackManifest>, ExtractorError>;
}

fn base_params(request: &NegotiationRequest<'_>) -> Vec<(&'static str, String)> {
    let (id_key, id_value) = request.identity.id.as_param();
    vec![
        (id_key, id_value),
        ("cid", request.stream_cid.to_string()),
        ("qn", TOP_TIER.to_string()),
        ("fnval", FNVAL_DASH_FULL.to_string()),
        ("fnver", "0".to_string()),
        ("fourk", "1".to_string()),
    ]
}

fn manifest_from_play_data(data: PlayData) -> Option<PlaybackManifest> {
    let manifest = data.dash.map(PlaybackManifest::from_dash)?;
    (!manifest.videos.is_empty()).then_some(manifest)
}

/// Primary variant: the signed endpoint, which grants elevated tiers when
/// the caller holds a credential.
pub struct SignedPlayUrl {
    api: SignedApi,
}

impl SignedPlayUrl {
    pub fn new(api: SignedApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PlaybackStrategy for SignedPlayUrl {
    fn name(&self) -> &'static str {
        "signed-playurl"
    }

    async fn try_negotiate(
        &self,
        request: &NegotiationRequest<'_>,
    ) -> Result<Option<PlaybackManifest>, ExtractorError> {
        if request.credential.is_none() {
            return Ok(None);
        }
        let mut params = base_params(request);
        params.push(("platform", "pc".to_string()));
        let data: PlayData = self
            .api
            .get_json(PLAYURL_WBI, params, request.credential)
            .await?;
        Ok(manifest_from_play_data(data))
    }
}

/// Anonymous variant with the permissive "try look" flag, which sometimes
/// grants 1080p-class tiers to unauthenticated callers.
pub struct AnonymousTryLook {
    api: SignedApi,
}

impl AnonymousTryLook {
    pub fn new(api: SignedApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PlaybackStrategy for AnonymousTryLook {
    fn name(&self) -> &'static str {
        "anonymous-try-look"
    }

    async fn try_negotiate(
        &self,
        request: &NegotiationRequest<'_>,
    ) -> Result<Option<PlaybackManifest>, ExtractorError> {
        let mut params = base_params(request);
        params.push(("platform", "pc".to_string()));
        params.push(("try_look", "1".to_string()));
        let data: PlayData = self.api.get_json(PLAYURL_WBI, params, None).await?;
        Ok(manifest_from_play_data(data))
    }
}

/// Last resort: the legacy unsigned endpoint with the html5 platform hint,
/// which authenticates differently and tolerates plain calls.
pub struct LegacyHtml5 {
    api: SignedApi,
}

impl LegacyHtml5 {
    pub fn new(api: SignedApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PlaybackStrategy for LegacyHtml5 {
    fn name(&self) -> &'static str {
        "legacy-html5"
    }

    async fn try_negotiate(
        &self,
        request: &NegotiationRequest<'_>,
    ) -> Result<Option<PlaybackManifest>, ExtractorError> {
        let mut params = base_params(request);
        params.push(("platform", "html5".to_string()));
        params.push(("high_quality", "1".to_string()));
        let data: PlayData = self
            .api
            .get_json_unsigned(PLAYURL_LEGACY, params, request.credential)
            .await?;
        Ok(manifest_from_play_data(data))
    }
}

/// Walks the strategy chain until one yields a usable manifest.
pub struct PlaybackNegotiator {
    strategies: Vec<Box<dyn PlaybackStrategy>>,
}

impl PlaybackNegotiator {
    /// Default chain, ordered from most to least privileged.
    pub fn new(api: SignedApi) -> Self {
        Self::with_strategies(vec![
            Box::new(SignedPlayUrl::new(api.clone())),
            Box::new(AnonymousTryLook::new(api.clone())),
            Box::new(LegacyHtml5::new(api)),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn PlaybackStrategy>>) -> Self {
        Self { strategies }
    }

    /// Negotiate a manifest for the asset. Each strategy is tried at most
    /// once; rejection or unavailability falls through to the next one.
    pub async fn negotiate(
        &self,
        identity: &AssetIdentity,
        stream_cid: u64,
        credential: Option<&Credential>,
    ) -> Result<PlaybackManifest, ExtractorError> {
        let request = NegotiationRequest {
            identity,
            stream_cid,
            credential,
        };

        for strategy in &self.strategies {
            match strategy.try_negotiate(&request).await {
                Ok(Some(manifest)) => {
                    debug!(
                        strategy = strategy.name(),
                        tiers = ?manifest.tiers_present(),
                        "negotiated playback manifest"
                    );
                    return Ok(manifest);
                }
                Ok(None) => {
                    debug!(strategy = strategy.name(), "strategy yielded no manifest");
                }
                Err(e) if e.is_fallthrough() => {
                    warn!(strategy = strategy.name(), error = %e, "strategy failed, trying next");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ExtractorError::NoPlaybackManifest)
    }
}
