use std::error::Error as _;
use std::net::IpAddr;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS};
use url::Url;

use crate::error::ValidationError;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";

/// Headers a desktop browser sends on navigation. Many CDNs reject bare clients.
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

/// Accepts only absolute http(s) URLs with a host.
pub fn validate_http_url(raw: &str) -> Result<Url, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    let url = Url::parse(trimmed).map_err(|e| ValidationError::InvalidUrl {
        url: trimmed.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(ValidationError::InvalidUrl {
            url: trimmed.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

/// Dedupe key for a scraped link. Only http(s) links have one; the fragment
/// and `utm_*` campaign parameters do not count.
pub fn link_key(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))?;
    url.set_fragment(None);
    let query = url.query().map(|q| {
        q.split('&')
            .filter(|pair| !pair.is_empty() && !pair.to_ascii_lowercase().starts_with("utm_"))
            .collect::<Vec<_>>()
            .join("&")
    });
    url.set_query(query.as_deref().filter(|q| !q.is_empty()));
    Some(url.to_string())
}

// Country codes whose registries sell names under a generic second level
// (bbc.co.uk, abc.net.au).
const CC_TLDS: &[&str] = &[
    "uk", "au", "ca", "in", "np", "nz", "za", "br", "mx", "ar", "cl", "pe", "co", "jp", "kr",
    "cn", "hk", "sg", "my", "th", "id", "ph", "vn", "tw", "de", "fr", "it", "es", "nl", "be",
    "at", "ch", "se", "no", "dk", "fi", "pl", "cz", "hu", "sk", "si", "hr", "rs", "bg", "ro",
    "gr", "cy", "mt", "ie", "pt", "lu", "li", "is", "lv", "lt", "ee", "ua", "ru", "by", "md",
    "eg", "il", "tr", "sa", "ae", "qa", "kw", "bh", "om", "jo", "lb", "ir", "ke", "ng", "gh",
    "ma", "tn", "dz", "ly", "sd", "et", "tz", "ug", "rw", "bd", "pk", "lk", "mm", "la", "kh",
    "bn", "mv",
];

const GENERIC_SECOND_LEVELS: &[&str] = &[
    "co", "com", "org", "net", "edu", "gov", "mil", "ac", "sch", "uni", "info", "biz", "name",
    "pro", "museum", "travel", "mobi", "tel", "jobs", "cat", "asia", "post", "geo", "int", "ne",
    "or", "go",
];

/// Collapses a hostname to its registrable domain.
///
/// `www.cnn.com` → `cnn.com`, `en.wikipedia.org` → `wikipedia.org`,
/// `news.bbc.co.uk` → `bbc.co.uk`. IP literals are returned unchanged.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return bare.to_string();
    }
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let parts = host.split('.').filter(|p| !p.is_empty()).collect::<Vec<_>>();
    if parts.len() < 3 {
        return parts.join(".");
    }
    let last = parts[parts.len() - 1];
    let second = parts[parts.len() - 2];
    let keep = if CC_TLDS.contains(&last) && GENERIC_SECOND_LEVELS.contains(&second) {
        3
    } else {
        2
    };
    parts[parts.len() - keep..].join(".")
}

pub fn domain_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let domain = registrable_domain(host);
    if domain.is_empty() { None } else { Some(domain) }
}

/// First label of the registrable domain, used as the site's brand token.
pub fn brand_label(url: &Url) -> Option<String> {
    let domain = registrable_domain(url.host_str()?);
    if domain.parse::<IpAddr>().is_ok() {
        return None;
    }
    domain
        .split('.')
        .next()
        .filter(|label| label.len() >= 2)
        .map(str::to_string)
}

/// reqwest does not expose a TLS predicate; walk the source chain instead.
pub fn is_tls_error(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("ssl") {
            return true;
        }
        source = inner.source();
    }
    false
}

pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut out = input.chars().take(max_chars).collect::<String>();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrable_domain_collapses_subdomains() {
        assert_eq!(registrable_domain("www.cnn.com"), "cnn.com");
        assert_eq!(registrable_domain("en.wikipedia.org"), "wikipedia.org");
        assert_eq!(registrable_domain("finance.yahoo.com"), "yahoo.com");
        assert_eq!(registrable_domain("news.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(registrable_domain("WWW.Example.COM."), "example.com");
        assert_eq!(registrable_domain("example.org"), "example.org");
        assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
        assert_eq!(registrable_domain("[::1]"), "::1");
    }

    #[test]
    fn link_key_ignores_fragment_and_campaign_params() {
        assert_eq!(
            link_key("https://example.com/a?utm_source=x&id=3#top").as_deref(),
            Some("https://example.com/a?id=3")
        );
        assert_eq!(
            link_key(" https://Example.com/a?UTM_medium=1 ").as_deref(),
            Some("https://example.com/a")
        );
        assert!(link_key("mailto:someone@example.com").is_none());
        assert!(link_key("   ").is_none());
    }

    #[test]
    fn validate_rejects_non_http_and_empty() {
        assert_eq!(validate_http_url(""), Err(ValidationError::EmptyUrl));
        assert!(matches!(
            validate_http_url("ftp://example.com"),
            Err(ValidationError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            validate_http_url("example.com"),
            Err(ValidationError::InvalidUrl { .. })
        ));
        assert_eq!(
            validate_http_url(" https://ibriz.ai/ ").unwrap().as_str(),
            "https://ibriz.ai/"
        );
    }

    #[test]
    fn brand_label_uses_registrable_domain() {
        let url = Url::parse("https://www.ibriz.ai/about").unwrap();
        assert_eq!(brand_label(&url).as_deref(), Some("ibriz"));
        let ip = Url::parse("http://10.0.0.1/").unwrap();
        assert_eq!(brand_label(&ip), None);
    }
}
