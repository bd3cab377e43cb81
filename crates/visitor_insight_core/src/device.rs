//! crates/visitor_insight_core/src/device.rs
//!
//! Derives a structured `DeviceInfo` from a user-agent string plus the screen,
//! timezone and language signals reported by the browser.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{DeviceInfo, DeviceType};

struct BrowserRule {
    name: &'static str,
    pattern: Regex,
}

fn rule(name: &'static str, pattern: &str) -> Option<BrowserRule> {
    Regex::new(pattern).ok().map(|pattern| BrowserRule { name, pattern })
}

// Order matters: Edge and Opera also advertise Chrome, Chrome also advertises Safari.
static BROWSER_RULES: Lazy<Vec<BrowserRule>> = Lazy::new(|| {
    [
        rule("Edge", r"Edg(?:e|A|iOS)?/([\d.]+)"),
        rule("Opera", r"(?:OPR|Opera)/([\d.]+)"),
        rule("Samsung Internet", r"SamsungBrowser/([\d.]+)"),
        rule("Firefox", r"(?:Firefox|FxiOS)/([\d.]+)"),
        rule("Chrome", r"(?:Chrome|CriOS)/([\d.]+)"),
        rule("Safari", r"Version/([\d.]+).*Safari/"),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static WINDOWS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"Windows NT ([\d.]+)").ok());
static ANDROID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"Android ([\d.]+)").ok());
static IOS: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:iPhone OS|CPU OS|iPad; CPU OS) ([\d_]+)").ok());
static MACOS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"Mac OS X ([\d_.]+)").ok());

fn capture(re: &Lazy<Option<Regex>>, ua: &str) -> Option<String> {
    re.as_ref()?
        .captures(ua)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace('_', "."))
}

fn windows_version(nt: &str) -> String {
    match nt {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        other => other,
    }
    .to_string()
}

/// Returns `(browser, version)`.
pub fn detect_browser(ua: &str) -> (String, String) {
    BROWSER_RULES
        .iter()
        .find_map(|rule| {
            rule.pattern.captures(ua).map(|c| {
                let version = c.get(1).map(|m| m.as_str()).unwrap_or_default();
                (rule.name.to_string(), version.to_string())
            })
        })
        .unwrap_or_else(|| ("Unknown".to_string(), String::new()))
}

/// Returns `(os, version)`.
pub fn detect_os(ua: &str) -> (String, String) {
    if let Some(nt) = capture(&WINDOWS, ua) {
        return ("Windows".to_string(), windows_version(&nt));
    }
    if let Some(v) = capture(&ANDROID, ua) {
        return ("Android".to_string(), v);
    }
    if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        return ("iOS".to_string(), capture(&IOS, ua).unwrap_or_default());
    }
    if let Some(v) = capture(&MACOS, ua) {
        return ("macOS".to_string(), v);
    }
    if ua.contains("CrOS") {
        return ("ChromeOS".to_string(), String::new());
    }
    if ua.contains("Linux") {
        return ("Linux".to_string(), String::new());
    }
    ("Unknown".to_string(), String::new())
}

pub fn detect_device_type(ua: &str) -> DeviceType {
    let android_tablet = ua.contains("Android") && !ua.contains("Mobile");
    if ua.contains("iPad") || ua.contains("Tablet") || android_tablet {
        DeviceType::Tablet
    } else if ua.contains("Mobi") || ua.contains("iPhone") || ua.contains("Android") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

impl DeviceInfo {
    pub fn from_user_agent(
        ua: &str,
        screen_resolution: &str,
        timezone: &str,
        language: &str,
    ) -> Self {
        let (browser, browser_version) = detect_browser(ua);
        let (os, os_version) = detect_os(ua);
        Self {
            browser,
            browser_version,
            os,
            os_version,
            device_type: detect_device_type(ua),
            screen_resolution: screen_resolution.to_string(),
            timezone: timezone.to_string(),
            language: language.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.109 Safari/537.36";
    const EDGE_WIN: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.91";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1";
    const ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
    const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    #[test]
    fn chrome_on_windows() {
        let info = DeviceInfo::from_user_agent(CHROME_WIN, "1920x1080", "America/Chicago", "en-US");
        assert_eq!(info.browser, "Chrome");
        assert_eq!(info.browser_version, "120.0.6099.109");
        assert_eq!(info.os, "Windows");
        assert_eq!(info.os_version, "10");
        assert_eq!(info.device_type, DeviceType::Desktop);
        assert_eq!(info.screen_resolution, "1920x1080");
    }

    #[test]
    fn edge_is_not_reported_as_chrome() {
        assert_eq!(detect_browser(EDGE_WIN).0, "Edge");
    }

    #[test]
    fn safari_on_iphone_is_mobile_ios() {
        let (browser, version) = detect_browser(SAFARI_IPHONE);
        assert_eq!((browser.as_str(), version.as_str()), ("Safari", "17.2"));
        assert_eq!(detect_os(SAFARI_IPHONE), ("iOS".to_string(), "17.2".to_string()));
        assert_eq!(detect_device_type(SAFARI_IPHONE), DeviceType::Mobile);
    }

    #[test]
    fn android_without_mobile_token_is_tablet() {
        assert_eq!(detect_device_type(ANDROID_TABLET), DeviceType::Tablet);
        assert_eq!(detect_os(ANDROID_TABLET).0, "Android");
    }

    #[test]
    fn firefox_on_linux_and_garbage() {
        assert_eq!(detect_browser(FIREFOX_LINUX).0, "Firefox");
        assert_eq!(detect_os(FIREFOX_LINUX).0, "Linux");
        assert_eq!(detect_browser("curl/8.0").0, "Unknown");
    }
}
