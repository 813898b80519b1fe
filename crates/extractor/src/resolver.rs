//! Canonical asset identity and metadata resolution.
//!
//! Takes free-form input (commonly copy-pasted share text with surrounding
//! prose), digs out the first platform URL, follows short links to the
//! long-form URL, strips tracking parameters and resolves the asset's
//! metadata through the signed API.

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

use crate::api::SignedApi;
use crate::credential::Credential;
use crate::error::ExtractorError;
use crate::models::ViewData;

static URL_IN_TEXT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>，。]+"#).unwrap());

static BV_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(BV[0-9A-Za-z]{5,})").unwrap());

static AV_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bav(\d+)").unwrap());

const VIEW_URL: &str = "https://api.bilibili.com/x/web-interface/view";

const SHORT_LINK_HOSTS: &[&str] = &["b23.tv", "acg.tv"];

/// Platform content id: either the modern alphanumeric form or the legacy
/// numeric form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetId {
    Bv(String),
    Av(u64),
}

impl AssetId {
    /// Query parameter pair for the metadata/playback endpoints.
    pub fn as_param(&self) -> (&'static str, String) {
        match self {
            AssetId::Bv(bvid) => ("bvid", bvid.clone()),
            AssetId::Av(aid) => ("aid", aid.to_string()),
        }
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetId::Bv(bvid) => write!(f, "{bvid}"),
            AssetId::Av(aid) => write!(f, "av{aid}"),
        }
    }
}

/// Canonical identity of one playable asset. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIdentity {
    pub id: AssetId,
    /// 1-based part index for multi-part assets.
    pub part: Option<u32>,
    pub canonical_url: String,
}

/// One sub-part of a multi-part asset.
#[derive(Debug, Clone)]
pub struct AssetPart {
    pub cid: u64,
    pub index: u32,
    pub name: String,
}

/// Resolved asset metadata, fetched fresh per request.
#[derive(Debug, Clone)]
pub struct AssetMetadata {
    pub identity: AssetIdentity,
    pub title: String,
    pub author: String,
    pub duration_secs: u64,
    pub cover_url: String,
    /// The stream container id used to fetch playback manifests for the
    /// selected part.
    pub stream_cid: u64,
    pub parts: Vec<AssetPart>,
}

pub struct AssetResolver {
    api: SignedApi,
}

impl AssetResolver {
    pub fn new(api: SignedApi) -> Self {
        Self { api }
    }

    /// Normalize raw input down to a canonical asset identity.
    ///
    /// Performs network I/O only when the input contains a known short-link
    /// URL that must be expanded; all other failures are decided locally.
    pub async fn canonicalize(&self, raw_input: &str) -> Result<AssetIdentity, ExtractorError> {
        let url_text = URL_IN_TEXT_REGEX
            .find(raw_input)
            .map(|m| m.as_str().to_string());

        let long_form = match url_text {
            Some(url) if is_short_link(&url) => self.expand_short_link(&url).await?,
            Some(url) => url,
            // No URL substring: accept a bare content id, else fail fast.
            None => raw_input.to_string(),
        };

        extract_identity(&long_form)
            .ok_or_else(|| ExtractorError::InvalidAssetReference(truncate(raw_input, 120)))
    }

    /// Resolve the identity and fetch the asset's metadata through the
    /// signed metadata endpoint.
    pub async fn resolve(
        &self,
        raw_input: &str,
        credential: Option<&Credential>,
    ) -> Result<AssetMetadata, ExtractorError> {
        let identity = self.canonicalize(raw_input).await?;

        let params = vec![identity.id.as_param()];
        let data: ViewData = self.api.get_json(VIEW_URL, params, credential).await?;

        Ok(into_metadata(identity, data))
    }

    /// Expand a short link by following its redirect chain (bounded by the
    /// shared client's redirect policy) to the long-form URL.
    async fn expand_short_link(&self, url: &str) -> Result<String, ExtractorError> {
        let response = self.api.http().get(url, None).send().await?;
        let resolved = response.url().to_string();
        debug!(short = url, long = %resolved, "expanded short link");
        Ok(resolved)
    }
}

fn is_short_link(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|host| {
            SHORT_LINK_HOSTS
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}")))
        })
}

/// Extract `{id, part}` from a long-form URL (or bare id text) and build
/// the canonical URL, dropping every share/tracking query parameter.
fn extract_identity(text: &str) -> Option<AssetIdentity> {
    let id = if let Some(caps) = BV_REGEX.captures(text) {
        AssetId::Bv(caps.get(1)?.as_str().to_string())
    } else if let Some(caps) = AV_REGEX.captures(text) {
        AssetId::Av(caps.get(1)?.as_str().parse().ok()?)
    } else {
        return None;
    };

    let part = Url::parse(text).ok().and_then(|u| {
        u.query_pairs()
            .find(|(k, _)| k == "p")
            .and_then(|(_, v)| v.parse::<u32>().ok())
    });

    let mut canonical_url = format!("https://www.bilibili.com/video/{id}");
    if let Some(p) = part
        && p > 1
    {
        canonical_url.push_str(&format!("?p={p}"));
    }

    Some(AssetIdentity {
        id,
        part,
        canonical_url,
    })
}

fn into_metadata(identity: AssetIdentity, data: ViewData) -> AssetMetadata {
    let parts: Vec<AssetPart> = data
        .pages
        .iter()
        .map(|p| AssetPart {
            cid: p.cid,
            index: p.page,
            name: p.part.clone(),
        })
        .collect();

    // The requested part's container id; default to the asset-level cid,
    // then the first page.
    let stream_cid = identity
        .part
        .and_then(|p| parts.iter().find(|part| part.index == p).map(|part| part.cid))
        .or_else(|| (data.cid > 0).then_some(data.cid))
        .or_else(|| parts.first().map(|p| p.cid))
        .unwrap_or(0);

    AssetMetadata {
        identity,
        title: data.title,
        author: data.owner.map(|o| o.name).unwrap_or_default(),
        duration_secs: data.duration,
        cover_url: normalize_cover(&data.pic),
        stream_cid,
        parts,
    }
}

/// Cover URLs are occasionally protocol-relative.
fn normalize_cover(pic: &str) -> String {
    if pic.starts_with("//") {
        format!("https:{pic}")
    } else {
        pic.to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bv_from_share_text() {
        let text = "【某视频】 https://www.bilibili.com/video/BV1xx411c7mD?spm_id_from=333.999&vd_source=abc 快来看";
        let url = URL_IN_TEXT_REGEX.find(text).unwrap().as_str();
        let identity = extract_identity(url).unwrap();
        assert_eq!(identity.id, AssetId::Bv("BV1xx411c7mD".to_string()));
        assert_eq!(identity.part, None);
        assert_eq!(
            identity.canonical_url,
            "https://www.bilibili.com/video/BV1xx411c7mD"
        );
    }

    #[test]
    fn extracts_part_index_and_keeps_it_canonical() {
        let identity =
            extract_identity("https://www.bilibili.com/video/BV1xx411c7mD?p=3&share_source=weixin")
                .unwrap();
        assert_eq!(identity.part, Some(3));
        assert_eq!(
            identity.canonical_url,
            "https://www.bilibili.com/video/BV1xx411c7mD?p=3"
        );
    }

    #[test]
    fn extracts_legacy_numeric_id() {
        let identity = extract_identity("https://www.bilibili.com/video/av170001").unwrap();
        assert_eq!(identity.id, AssetId::Av(170001));
        assert_eq!(
            identity.canonical_url,
            "https://www.bilibili.com/video/av170001"
        );
    }

    #[test]
    fn bare_content_id_is_accepted() {
        let identity = extract_identity("BV1xx411c7mD").unwrap();
        assert_eq!(identity.id, AssetId::Bv("BV1xx411c7mD".to_string()));
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(extract_identity("not a video reference at all").is_none());
        assert!(extract_identity("https://example.com/watch?v=123").is_none());
    }

    #[tokio::test]
    async fn canonicalize_fails_fast_without_an_id() {
        use crate::api::SignedApi;
        use crate::http::ApiClient;
        use crate::keys::KeyCache;
        use std::sync::Arc;

        let api = ApiClient::new(crate::default::default_client());
        let resolver = AssetResolver::new(SignedApi::new(
            api.clone(),
            Arc::new(KeyCache::new(api)),
        ));
        // No URL substring and no bare id: decided locally, no request made.
        let err = resolver
            .canonicalize("definitely not a video reference")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::InvalidAssetReference(_)));
    }

    #[test]
    fn short_link_detection() {
        assert!(is_short_link("https://b23.tv/abCdEf"));
        assert!(is_short_link("http://www.b23.tv/abCdEf"));
        assert!(!is_short_link("https://www.bilibili.com/video/BV1xx411c7mD"));
        assert!(!is_short_link("https://notb23.tv/x"));
    }

    #[test]
    fn part_cid_selection() {
        let identity = extract_identity("https://www.bilibili.com/video/BV1xx411c7mD?p=2").unwrap();
        let data = ViewData {
            bvid: "BV1xx411c7mD".into(),
            aid: 1,
            title: "t".into(),
            pic: "//i0.hdslb.com/cover.jpg".into(),
            duration: 60,
            cid: 100,
            owner: None,
            pages: vec![
                crate::models::PageInfo {
                    cid: 100,
                    page: 1,
                    part: "p1".into(),
                },
                crate::models::PageInfo {
                    cid: 200,
                    page: 2,
                    part: "p2".into(),
                },
            ],
        };
        let meta = into_metadata(identity, data);
        assert_eq!(meta.stream_cid, 200);
        assert_eq!(meta.cover_url, "https://i0.hdslb.com/cover.jpg");
    }
}
