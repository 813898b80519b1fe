//! Small shared helpers.

/// Maximum filename stem length after sanitization.
const MAX_STEM_LEN: usize = 50;

/// Strip characters that are unsafe in filenames on common platforms and
/// cap the length so titles do not blow past path limits.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return "download".to_string();
    }
    trimmed.chars().take(MAX_STEM_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("normal title", "normal title")]
    #[case("a/b\\c:d", "a_b_c_d")]
    #[case("what? <this>", "what_ _this_")]
    #[case("   ", "download")]
    fn sanitization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_filename(input), expected);
    }

    #[test]
    fn sanitization_caps_length() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_filename(&long).chars().count(), 50);
    }

    #[test]
    fn multibyte_titles_keep_their_characters() {
        let name = sanitize_filename("测试视频: 第一集");
        assert!(name.starts_with("测试视频_"));
    }
}
