//! Session credential material and the anonymous baseline identity.

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// Opaque session tokens granting access to higher quality tiers.
///
/// Supplied per request by the caller; the core never persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub sessdata: String,
    pub bili_jct: String,
    pub dede_user_id: String,
}

impl Credential {
    pub fn new(
        sessdata: impl Into<String>,
        bili_jct: impl Into<String>,
        dede_user_id: impl Into<String>,
    ) -> Self {
        Self {
            sessdata: sessdata.into(),
            bili_jct: bili_jct.into(),
            dede_user_id: dede_user_id.into(),
        }
    }

    pub fn cookie_header(&self) -> String {
        format!(
            "SESSDATA={}; bili_jct={}; DedeUserID={}",
            self.sessdata, self.bili_jct, self.dede_user_id
        )
    }
}

/// Build the Cookie header for a request: the caller's credential when
/// present, otherwise a synthetic device identity so unauthenticated
/// requests still resolve plausible metadata.
pub fn cookie_header_or_baseline(credential: Option<&Credential>) -> String {
    match credential {
        Some(c) => c.cookie_header(),
        None => baseline_identity(),
    }
}

fn baseline_identity() -> String {
    let mut rng = rand::rng();
    let a: u128 = rng.random();
    let b: u32 = rng.random_range(0..100000);
    format!("buvid3={a:032X}{b:05}infoc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_format() {
        let c = Credential::new("sd", "jct", "42");
        assert_eq!(c.cookie_header(), "SESSDATA=sd; bili_jct=jct; DedeUserID=42");
    }

    #[test]
    fn baseline_is_device_cookie() {
        let header = cookie_header_or_baseline(None);
        assert!(header.starts_with("buvid3="));
        assert!(header.ends_with("infoc"));
    }
}
