use crate::models::metadata::UNKNOWN;

/// Coarse classification of a User-Agent string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUserAgent {
    pub device: String,
    pub platform: String,
    pub browser: String,
    pub browser_version: String,
}

impl ParsedUserAgent {
    fn unknown() -> Self {
        Self {
            device: UNKNOWN.to_string(),
            platform: UNKNOWN.to_string(),
            browser: UNKNOWN.to_string(),
            browser_version: UNKNOWN.to_string(),
        }
    }
}

// Order matters: Edge and Opera embed "Chrome/", Chrome embeds "Safari/".
const BROWSERS: &[(&str, &str)] = &[
    ("edg/", "Edge"),
    ("edge/", "Edge"),
    ("opr/", "Opera"),
    ("opera/", "Opera"),
    ("samsungbrowser/", "Samsung Internet"),
    ("firefox/", "Firefox"),
    ("fxios/", "Firefox iOS"),
    ("crios/", "Chrome Mobile iOS"),
    ("chrome/", "Chrome"),
    ("msie ", "IE"),
    ("trident/", "IE"),
    ("version/", "Safari"),
    ("curl/", "curl"),
    ("wget/", "Wget"),
    ("python-requests/", "Python Requests"),
    ("python-urllib/", "Python-urllib"),
    ("go-http-client/", "Go-http-client"),
    ("okhttp/", "okhttp"),
    ("postmanruntime/", "PostmanRuntime"),
    ("googlebot/", "Googlebot"),
    ("bingbot/", "bingbot"),
];

const PLATFORMS: &[(&str, &str)] = &[
    ("windows phone", "Windows Phone"),
    ("windows", "Windows"),
    ("iphone", "iOS"),
    ("ipad", "iOS"),
    ("ipod", "iOS"),
    ("android", "Android"),
    ("cros", "Chrome OS"),
    ("mac os x", "Mac OS X"),
    ("macintosh", "Mac OS X"),
    ("ubuntu", "Ubuntu"),
    ("linux", "Linux"),
    ("freebsd", "FreeBSD"),
];

const BOT_MARKERS: &[&str] = &["bot", "spider", "crawler", "slurp"];

/// Classify a User-Agent into device, platform, browser family and version.
///
/// Never fails: anything unrecognised degrades to `"unknown"`.
pub fn parse(user_agent: &str) -> ParsedUserAgent {
    let trimmed = user_agent.trim();
    if trimmed.is_empty() || trimmed == crate::models::metadata::NOT_AVAILABLE {
        return ParsedUserAgent::unknown();
    }
    let lower = trimmed.to_ascii_lowercase();

    let (browser, browser_version) = BROWSERS
        .iter()
        .find_map(|(marker, family)| {
            lower.find(marker).map(|pos| {
                let version = version_after(trimmed, pos + marker.len());
                (family.to_string(), version)
            })
        })
        .unwrap_or_else(|| (UNKNOWN.to_string(), UNKNOWN.to_string()));

    let platform = PLATFORMS
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string());

    ParsedUserAgent {
        device: device_type(&lower),
        platform,
        browser,
        browser_version,
    }
}

fn device_type(lower: &str) -> String {
    let device = if BOT_MARKERS.iter().any(|m| lower.contains(m)) {
        "Spider"
    } else if lower.contains("ipad") || lower.contains("tablet") {
        "Tablet"
    } else if lower.contains("iphone") || lower.contains("mobile") || lower.contains("android") {
        "Mobile"
    } else if lower.contains("windows")
        || lower.contains("macintosh")
        || lower.contains("x11")
        || lower.contains("cros")
    {
        "PC"
    } else {
        "Other"
    };
    device.to_string()
}

/// Read a dotted version number starting at `start`.
fn version_after(ua: &str, start: usize) -> String {
    let version: String = ua
        .get(start..)
        .unwrap_or_default()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let version = version.trim_end_matches('.');
    if version.is_empty() {
        UNKNOWN.to_string()
    } else {
        version.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_chrome() {
        let ua = parse(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/124.0.6367.60 Safari/537.36",
        );
        assert_eq!(ua.browser, "Chrome");
        assert_eq!(ua.browser_version, "124.0.6367.60");
        assert_eq!(ua.platform, "Windows");
        assert_eq!(ua.device, "PC");
    }

    #[test]
    fn edge_is_not_reported_as_chrome() {
        let ua = parse(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91",
        );
        assert_eq!(ua.browser, "Edge");
        assert_eq!(ua.browser_version, "120.0.2210.91");
    }

    #[test]
    fn mobile_safari() {
        let ua = parse(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 \
             (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
        );
        assert_eq!(ua.browser, "Safari");
        assert_eq!(ua.browser_version, "17.4");
        assert_eq!(ua.platform, "iOS");
        assert_eq!(ua.device, "Mobile");
    }

    #[test]
    fn command_line_client() {
        let ua = parse("curl/8.5.0");
        assert_eq!(ua.browser, "curl");
        assert_eq!(ua.browser_version, "8.5.0");
        assert_eq!(ua.platform, "unknown");
        assert_eq!(ua.device, "Other");
    }

    #[test]
    fn crawler_is_a_spider() {
        let ua = parse("Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)");
        assert_eq!(ua.browser, "Googlebot");
        assert_eq!(ua.device, "Spider");
    }

    #[test]
    fn garbage_degrades_to_unknown() {
        assert_eq!(parse(""), ParsedUserAgent::unknown());
        assert_eq!(parse("N/A"), ParsedUserAgent::unknown());

        let ua = parse("\u{1F433}\u{1F433}\u{1F433}");
        assert_eq!(ua.browser, "unknown");
        assert_eq!(ua.browser_version, "unknown");
    }
}
