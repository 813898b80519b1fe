//! Serde models for the upstream API responses.

use serde::Deserialize;

/// Standard envelope every upstream endpoint uses.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct WbiImg {
    pub img_url: String,
    pub sub_url: String,
}

#[derive(Debug, Deserialize)]
pub struct NavData {
    pub wbi_img: WbiImg,
}

#[derive(Debug, Deserialize)]
pub struct Owner {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mid: u64,
}

#[derive(Debug, Deserialize)]
pub struct PageInfo {
    pub cid: u64,
    pub page: u32,
    #[serde(default)]
    pub part: String,
}

/// Metadata (`view`) endpoint payload.
#[derive(Debug, Deserialize)]
pub struct ViewData {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub aid: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pic: String,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub cid: u64,
    pub owner: Option<Owner>,
    #[serde(default)]
    pub pages: Vec<PageInfo>,
}

/// A DASH elementary video rendition. The upstream emits `base_url` or
/// `baseUrl` depending on the endpoint variant.
#[derive(Debug, Deserialize)]
pub struct DashVideo {
    pub id: u32,
    #[serde(rename = "base_url", alias = "baseUrl")]
    pub base_url: String,
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub codecs: String,
}

#[derive(Debug, Deserialize)]
pub struct DashAudio {
    #[serde(rename = "base_url", alias = "baseUrl")]
    pub base_url: String,
    #[serde(default)]
    pub bandwidth: u64,
}

#[derive(Debug, Deserialize)]
pub struct Dash {
    #[serde(default)]
    pub video: Vec<DashVideo>,
    #[serde(default)]
    pub audio: Vec<DashAudio>,
}

/// Playback (`playurl`) endpoint payload. `dash` is absent when the
/// upstream only grants a legacy progressive stream.
#[derive(Debug, Deserialize)]
pub struct PlayData {
    pub dash: Option<Dash>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_accepts_both_url_spellings() {
        let snake: DashVideo =
            serde_json::from_str(r#"{"id":80,"base_url":"http://a/v.m4s","bandwidth":1}"#).unwrap();
        let camel: DashVideo =
            serde_json::from_str(r#"{"id":80,"baseUrl":"http://a/v.m4s"}"#).unwrap();
        assert_eq!(snake.base_url, camel.base_url);
    }

    #[test]
    fn envelope_with_missing_data() {
        let resp: ApiResponse<ViewData> =
            serde_json::from_str(r#"{"code":-404,"message":"啥都木有"}"#).unwrap();
        assert_eq!(resp.code, -404);
        assert!(resp.data.is_none());
    }
}
