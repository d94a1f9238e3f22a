use std::sync::LazyLock;

use regex::Regex;

/// Browser family and version extracted from a user-agent string.
#[derive(Debug, Clone, PartialEq)]
pub struct Browser {
    pub family: &'static str,
    pub version: String,
}

/// Family patterns in precedence order. Edge and Opera advertise a Chrome
/// token, and Chrome advertises Safari, so the more specific families come
/// first. Safari takes its version from the separate `Version/` token.
static BROWSER_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("Edge", r"(?:Edge|Edg|EdgA|EdgiOS)/([0-9][0-9.]*)"),
        ("Opera", r"(?:OPR|Opera)/([0-9][0-9.]*)"),
        ("Chrome", r"(?:Chrome|CriOS)/([0-9][0-9.]*)"),
        ("Firefox", r"(?:Firefox|FxiOS)/([0-9][0-9.]*)"),
        ("Safari", r"Version/([0-9][0-9.]*)[^)]*Safari"),
        ("MSIE", r"MSIE ([0-9][0-9.]*)"),
    ]
    .into_iter()
    .map(|(family, pattern)| (family, Regex::new(pattern).expect("invalid UA pattern")))
    .collect()
});

/// Best-effort parse of a user-agent string. `None` for bots, curl and
/// anything else that does not look like a browser.
pub fn parse_user_agent(user_agent: &str) -> Option<Browser> {
    for (family, pattern) in BROWSER_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(user_agent) {
            let version = captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Some(Browser { family, version });
        }
    }
    None
}

/// Case-insensitive membership test against the configured family list.
pub fn is_unsupported(browser: &Browser, unsupported: &[String]) -> bool {
    unsupported
        .iter()
        .any(|family| family.eq_ignore_ascii_case(browser.family))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const FIREFOX_UA: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15";
    const EDGE_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
        (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";

    #[test]
    fn test_chrome_detected_despite_safari_token() {
        let browser = parse_user_agent(CHROME_UA).unwrap();
        assert_eq!(browser.family, "Chrome");
        assert_eq!(browser.version, "120.0.0.0");
    }

    #[test]
    fn test_edge_wins_over_chrome_token() {
        let browser = parse_user_agent(EDGE_UA).unwrap();
        assert_eq!(browser.family, "Edge");
    }

    #[test]
    fn test_firefox_and_safari() {
        assert_eq!(parse_user_agent(FIREFOX_UA).unwrap().family, "Firefox");
        let safari = parse_user_agent(SAFARI_UA).unwrap();
        assert_eq!(safari.family, "Safari");
        assert_eq!(safari.version, "17.1");
    }

    #[test]
    fn test_non_browser_agents_pass() {
        assert_eq!(parse_user_agent("curl/8.4.0"), None);
        assert_eq!(parse_user_agent(""), None);
    }

    #[test]
    fn test_unsupported_match_is_case_insensitive() {
        let browser = parse_user_agent(CHROME_UA).unwrap();
        assert!(is_unsupported(&browser, &["chrome".to_string()]));
        assert!(!is_unsupported(&browser, &["Firefox".to_string()]));
    }
}
