//! Request signing for the upstream private APIs.
//!
//! Two opaque key fragments are permuted through a fixed mixing table into a
//! 32-character secret. The parameter set, extended with a current-time
//! field, is serialized deterministically and digested together with the
//! secret to produce the `w_rid` signature field.

use md5::Digest;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::keys::WbiKeys;

const MIXIN_KEY_ENC_TAB: [usize; 64] = [
    46, 47, 18, 2, 53, 8, 23, 32, 15, 50, 10, 31, 58, 3, 45, 35, 27, 43, 5, 49, 33, 9, 42, 19, 29,
    28, 14, 39, 12, 38, 41, 13, 37, 48, 7, 16, 24, 55, 40, 61, 26, 17, 0, 1, 60, 51, 30, 4, 22, 25,
    54, 21, 56, 59, 6, 63, 57, 62, 11, 36, 20, 34, 44, 52,
];

/// Permute the concatenated key fragments into the 32-character mixin key.
fn get_mixin_key(orig: &[u8]) -> String {
    MIXIN_KEY_ENC_TAB
        .iter()
        .take(32)
        .map(|&i| orig[i] as char)
        .collect::<String>()
}

/// Percent-encode a single key or value the way the upstream parser expects.
///
/// Unreserved characters pass through; `! ' ( ) *` are stripped entirely
/// because they are known to break upstream parsing; everything else is
/// percent-encoded byte-wise.
fn get_url_encoded(s: &str) -> String {
    let mut encoded = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => {
                encoded.push(c);
            }
            '!' | '\'' | '(' | ')' | '*' => {}
            _ => {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    encoded.push_str(&format!("%{b:02X}"));
                }
            }
        }
    }
    encoded
}

fn serialize_params(mut params: Vec<(&str, String)>) -> String {
    params.sort_by(|a, b| a.0.cmp(b.0));
    params
        .iter()
        .map(|(k, v)| format!("{}={}", get_url_encoded(k), get_url_encoded(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a parameter set, producing the final query string.
///
/// When no key material is available the plain serialized query is returned
/// instead, since some upstream endpoints tolerate unsigned calls, so a missing
/// key is degraded behavior rather than an error.
pub fn sign(params: Vec<(&str, String)>, keys: Option<&WbiKeys>) -> String {
    let Some(keys) = keys else {
        return serialize_params(params);
    };
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_secs())
        .unwrap_or(0);
    sign_at(params, (keys.fragment_a(), keys.fragment_b()), now)
}

fn sign_at(mut params: Vec<(&str, String)>, (key_a, key_b): (&str, &str), timestamp: u64) -> String {
    let mixin_key = get_mixin_key((key_a.to_owned() + key_b).as_bytes());
    params.push(("wts", timestamp.to_string()));
    let query = serialize_params(params);
    let mut hasher = md5::Md5::new();
    hasher.update(query.clone() + &mixin_key);
    let digest = hasher.finalize();
    let web_sign = format!("{digest:x}");
    query + &format!("&w_rid={web_sign}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "7cd084941338484aae1ad9425b84077c";
    const KEY_B: &str = "4932caff0ff746eab6f01bf08b70ac45";

    #[test]
    fn test_get_mixin_key() {
        let concat_key = KEY_A.to_string() + KEY_B;
        assert_eq!(
            get_mixin_key(concat_key.as_bytes()),
            "ea1db124af3c7062474693fa704f4ff8"
        );
    }

    #[test]
    fn test_sign_at() {
        let params = vec![
            ("foo", String::from("114")),
            ("bar", String::from("514")),
            ("zab", String::from("1919810")),
        ];
        assert_eq!(
            sign_at(params, (KEY_A, KEY_B), 1702204169),
            "bar=514&foo=114&wts=1702204169&zab=1919810&w_rid=8f6f2b5b3d485fe1886cec6a0be8c5d4"
        );
    }

    #[test]
    fn test_strips_breaking_characters() {
        assert_eq!(get_url_encoded("a!b'c(d)e*f"), "abcdef");
        assert_eq!(get_url_encoded("a b"), "a%20b");
        assert_eq!(get_url_encoded("BV1xx411c7mD"), "BV1xx411c7mD");
    }

    #[test]
    fn test_unsigned_fallback_has_no_signature() {
        let params = vec![("bvid", String::from("BV1xx411c7mD"))];
        let query = sign(params, None);
        assert_eq!(query, "bvid=BV1xx411c7mD");
        assert!(!query.contains("w_rid"));
        assert!(!query.contains("wts"));
    }
}
