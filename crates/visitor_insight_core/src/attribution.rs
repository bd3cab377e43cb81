//! crates/visitor_insight_core/src/attribution.rs
//!
//! Classifies where a visitor came from using the referrer and UTM parameters
//! captured on the landing page.

use crate::domain::Attribution;

const SOCIAL_HOSTS: [&str; 10] = [
    "facebook.", "instagram.", "twitter.", "x.com", "t.co", "linkedin.", "pinterest.",
    "reddit.", "tiktok.", "youtube.",
];
const SEARCH_HOSTS: [&str; 5] = ["google.", "bing.", "duckduckgo.", "yahoo.", "baidu."];
const PAID_MEDIUMS: [&str; 3] = ["cpc", "ppc", "paid"];

/// Host part of a referrer URL, lower-cased and without a leading `www.`.
pub fn referrer_host(referrer: &str) -> Option<String> {
    let without_scheme = referrer
        .split_once("://")
        .map_or(referrer, |(_, rest)| rest);
    let host = without_scheme
        .split(['/', '?', '#', ':'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    (!host.is_empty()).then_some(host)
}

fn host_matches(host: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| {
        if p.ends_with('.') {
            host.starts_with(p) || host.contains(&format!(".{}", p))
        } else {
            host == *p || host.ends_with(&format!(".{}", p))
        }
    })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Fills `traffic_source`, `traffic_medium` and `traffic_channel` from the raw fields.
pub fn classify(mut attribution: Attribution) -> Attribution {
    let host = non_empty(&attribution.referrer).and_then(referrer_host);
    let medium = non_empty(&attribution.utm_medium).map(str::to_lowercase);
    let source = non_empty(&attribution.utm_source).map(str::to_lowercase);

    let channel = match (&medium, &host) {
        (Some(m), _) if PAID_MEDIUMS.contains(&m.as_str()) => "paid",
        (Some(m), _) if m == "email" => "email",
        (Some(m), _) if m == "social" => "social",
        (_, Some(h)) if host_matches(h, &SOCIAL_HOSTS) => "social",
        (_, Some(h)) if host_matches(h, &SEARCH_HOSTS) => "organic_search",
        (_, Some(_)) => "referral",
        (Some(_), None) => "campaign",
        (None, None) if source.is_some() => "campaign",
        (None, None) => "direct",
    };

    attribution.traffic_source = source
        .clone()
        .or_else(|| host.clone())
        .unwrap_or_else(|| "direct".to_string());
    attribution.traffic_medium = medium.unwrap_or_else(|| match channel {
        "organic_search" => "organic".to_string(),
        "direct" => "none".to_string(),
        other => other.to_string(),
    });
    attribution.traffic_channel = channel.to_string();
    attribution
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(referrer: Option<&str>, source: Option<&str>, medium: Option<&str>) -> Attribution {
        classify(Attribution {
            referrer: referrer.map(str::to_string),
            utm_source: source.map(str::to_string),
            utm_medium: medium.map(str::to_string),
            ..Default::default()
        })
    }

    #[test]
    fn direct_when_nothing_is_known() {
        let a = with(None, None, None);
        assert_eq!(a.traffic_channel, "direct");
        assert_eq!(a.traffic_source, "direct");
        assert_eq!(a.traffic_medium, "none");
    }

    #[test]
    fn utm_medium_beats_referrer() {
        let a = with(Some("https://www.google.com/search?q=x"), Some("Newsletter"), Some("email"));
        assert_eq!(a.traffic_channel, "email");
        assert_eq!(a.traffic_source, "newsletter");

        assert_eq!(with(Some("https://google.com"), Some("google"), Some("cpc")).traffic_channel, "paid");
    }

    #[test]
    fn referrer_hosts_are_classified() {
        let a = with(Some("https://www.google.com/search?q=bible"), None, None);
        assert_eq!(a.traffic_channel, "organic_search");
        assert_eq!(a.traffic_source, "google.com");
        assert_eq!(a.traffic_medium, "organic");

        assert_eq!(with(Some("https://m.facebook.com/"), None, None).traffic_channel, "social");
        assert_eq!(with(Some("https://t.co/abc"), None, None).traffic_channel, "social");
        assert_eq!(with(Some("https://someblog.net/post"), None, None).traffic_channel, "referral");
    }

    #[test]
    fn referrer_host_parsing() {
        assert_eq!(referrer_host("https://WWW.Example.com:8080/x").as_deref(), Some("example.com"));
        assert_eq!(referrer_host("example.org/path").as_deref(), Some("example.org"));
        assert_eq!(referrer_host(""), None);
    }
}
