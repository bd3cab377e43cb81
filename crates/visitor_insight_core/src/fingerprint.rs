//! crates/visitor_insight_core/src/fingerprint.rs
//!
//! The device fingerprint collector. Signals are provided by a `SignalSource`
//! (a browser host implements it against the DOM; tests use fixed values), the
//! collector canonicalises whatever the source returns and hashes it.
//!
//! Collection never fails: a signal that errors or times out contributes a
//! sentinel string instead of aborting the whole signature.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{DeviceInfo, DeviceSignature, SignatureStrength};

pub const NO_CANVAS: &str = "no-canvas";
pub const NO_WEBGL: &str = "no-webgl";
pub const AUDIO_ERROR: &str = "audio-error";
pub const AUDIO_TIMEOUT: &str = "audio-timeout";
pub const NO_FONTS: &str = "no-fonts";
pub const NO_NAVIGATOR: &str = "no-navigator";
pub const NO_SCREEN: &str = "no-screen";
pub const NO_USER_AGENT: &str = "no-user-agent";

/// Text rendered when comparing glyph widths during font detection.
pub const FONT_TEST_STRING: &str = "mmmmmmmmmmlli";
pub const FONT_BASELINES: [&str; 3] = ["monospace", "sans-serif", "serif"];

const DEFAULT_AUDIO_TIMEOUT: Duration = Duration::from_millis(1000);

//=========================================================================================
// Signal Types
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("signal unsupported: {0}")]
    Unsupported(String),
    #[error("signal failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WebGlSignals {
    pub vendor: String,
    pub renderer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigatorSignals {
    pub language: String,
    pub platform: String,
    pub hardware_concurrency: u32,
    pub device_memory: Option<f32>,
    pub touch_support: bool,
    pub cookie_enabled: bool,
    pub do_not_track: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenSignals {
    pub width: u32,
    pub height: u32,
    pub color_depth: u32,
    pub timezone: String,
}

impl ScreenSignals {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// One method per browser signal.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Raw pixel data of the rendered text/shape canvas.
    fn canvas(&self) -> Result<Vec<u8>, SignalError>;

    fn webgl(&self) -> Result<WebGlSignals, SignalError>;

    /// Samples read from an analyser node fed by an oscillator. May be slow.
    async fn audio(&self) -> Result<Vec<f32>, SignalError>;

    /// Names of installed fonts, typically produced with [`detect_fonts`].
    fn fonts(&self) -> Result<Vec<String>, SignalError>;

    fn navigator(&self) -> Result<NavigatorSignals, SignalError>;

    fn screen(&self) -> Result<ScreenSignals, SignalError>;

    fn user_agent(&self) -> Result<String, SignalError>;

    /// Whether a cryptographic digest is available to the host.
    fn crypto_available(&self) -> bool {
        true
    }
}

/// Returns the candidates whose rendered width differs from at least one baseline
/// family. `measure` renders [`FONT_TEST_STRING`] in the given font stack and
/// returns its width, or `None` if measuring failed.
pub fn detect_fonts<F>(candidates: &[&str], measure: F) -> Vec<String>
where
    F: Fn(&str) -> Option<f64>,
{
    let baselines: Vec<(&str, f64)> = FONT_BASELINES
        .iter()
        .filter_map(|base| measure(base).map(|w| (*base, w)))
        .collect();

    candidates
        .iter()
        .filter(|font| {
            baselines.iter().any(|(base, base_width)| {
                measure(&format!("'{}', {}", font, base))
                    .is_some_and(|w| (w - base_width).abs() > f64::EPSILON)
            })
        })
        .map(|font| font.to_string())
        .collect()
}

//=========================================================================================
// Hashing
//=========================================================================================

pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

/// 32-bit rolling hash (`h * 31 + byte`). Deterministic, not collision resistant.
pub fn rolling_hash(input: &[u8]) -> String {
    let hash = input
        .iter()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(*b)));
    format!("{:08x}", hash)
}

/// Joins components as `key:value` in key order, separated by `|`.
pub fn canonical_string(components: &BTreeMap<String, String>) -> String {
    components
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join("|")
}

//=========================================================================================
// Signature Cache
//=========================================================================================

/// Client-side persistence of a computed signature.
pub trait SignatureCache: Send + Sync {
    fn load(&self) -> Option<DeviceSignature>;
    fn store(&self, signature: &DeviceSignature);
}

#[derive(Default)]
pub struct MemorySignatureCache {
    slot: Mutex<Option<DeviceSignature>>,
}

impl SignatureCache for MemorySignatureCache {
    fn load(&self) -> Option<DeviceSignature> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }

    fn store(&self, signature: &DeviceSignature) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(signature.clone());
        }
    }
}

//=========================================================================================
// Collector
//=========================================================================================

pub struct FingerprintCollector {
    source: Arc<dyn SignalSource>,
    cache: Option<Arc<dyn SignatureCache>>,
    audio_timeout: Duration,
}

impl FingerprintCollector {
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        Self {
            source,
            cache: None,
            audio_timeout: DEFAULT_AUDIO_TIMEOUT,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn SignatureCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_audio_timeout(mut self, timeout: Duration) -> Self {
        self.audio_timeout = timeout;
        self
    }

    /// Returns the cached signature if present, otherwise collects, hashes and caches.
    pub async fn collect(&self) -> DeviceSignature {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.load()) {
            debug!(hash = %cached.hash, "Using cached device signature");
            return cached;
        }

        let signature = self.compute().await;
        if let Some(cache) = &self.cache {
            cache.store(&signature);
        }
        signature
    }

    /// Runs collection on a background task so callers never wait on the signal source.
    pub fn collect_in_background(self: Arc<Self>) -> tokio::task::JoinHandle<DeviceSignature> {
        tokio::spawn(async move { self.collect().await })
    }

    async fn compute(&self) -> DeviceSignature {
        let strong = self.source.crypto_available();
        let digest = |bytes: &[u8]| {
            if strong {
                sha256_hex(bytes)
            } else {
                rolling_hash(bytes)
            }
        };
        let mut components = BTreeMap::new();

        let canvas = match self.source.canvas() {
            Ok(pixels) => digest(&pixels),
            Err(e) => sentinel("canvas", NO_CANVAS, &e),
        };
        components.insert("canvas".to_string(), canvas);

        let webgl = match self.source.webgl() {
            Ok(gl) => format!("{}~{}", gl.vendor, gl.renderer),
            Err(e) => sentinel("webgl", NO_WEBGL, &e),
        };
        components.insert("webgl".to_string(), webgl);

        let audio = match tokio::time::timeout(self.audio_timeout, self.source.audio()).await {
            Ok(Ok(samples)) => {
                let sum: f64 = samples.iter().map(|s| f64::from(s.abs())).sum();
                format!("{:.6}", sum)
            }
            Ok(Err(e)) => sentinel("audio", AUDIO_ERROR, &e),
            Err(_) => {
                warn!(timeout_ms = self.audio_timeout.as_millis() as u64, "Audio signal timed out");
                AUDIO_TIMEOUT.to_string()
            }
        };
        components.insert("audio".to_string(), audio);

        let fonts = match self.source.fonts() {
            Ok(mut fonts) => {
                fonts.sort();
                fonts.join(",")
            }
            Err(e) => sentinel("fonts", NO_FONTS, &e),
        };
        components.insert("fonts".to_string(), fonts);

        let navigator = self.source.navigator();
        match &navigator {
            Ok(nav) => {
                components.insert("language".to_string(), nav.language.clone());
                components.insert("platform".to_string(), nav.platform.clone());
                components.insert(
                    "hardware_concurrency".to_string(),
                    nav.hardware_concurrency.to_string(),
                );
                components.insert(
                    "device_memory".to_string(),
                    nav.device_memory
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                );
                components.insert("touch".to_string(), nav.touch_support.to_string());
                components.insert("cookies".to_string(), nav.cookie_enabled.to_string());
                components.insert(
                    "dnt".to_string(),
                    nav.do_not_track.clone().unwrap_or_else(|| "unspecified".to_string()),
                );
            }
            Err(e) => {
                let value = sentinel("navigator", NO_NAVIGATOR, &e);
                components.insert("navigator".to_string(), value);
            }
        }

        let screen = self.source.screen();
        match &screen {
            Ok(s) => {
                components.insert(
                    "screen".to_string(),
                    format!("{}x{}x{}", s.width, s.height, s.color_depth),
                );
                components.insert("timezone".to_string(), s.timezone.clone());
            }
            Err(e) => {
                let value = sentinel("screen", NO_SCREEN, &e);
                components.insert("screen".to_string(), value);
            }
        }

        let user_agent = self.source.user_agent();
        components.insert(
            "user_agent".to_string(),
            match &user_agent {
                Ok(ua) => ua.clone(),
                Err(e) => sentinel("user_agent", NO_USER_AGENT, &e),
            },
        );

        let resolution = screen.as_ref().map(|s| s.resolution()).unwrap_or_default();
        let timezone = screen.as_ref().map(|s| s.timezone.clone()).unwrap_or_default();
        let language = navigator
            .as_ref()
            .map(|n| n.language.clone())
            .unwrap_or_default();
        let device_info = match &user_agent {
            Ok(ua) => DeviceInfo::from_user_agent(ua, &resolution, &timezone, &language),
            Err(_) => DeviceInfo {
                screen_resolution: resolution,
                timezone,
                language,
                ..DeviceInfo::default()
            },
        };

        let canonical = canonical_string(&components);
        let (hash, strength) = if strong {
            (sha256_hex(canonical.as_bytes()), SignatureStrength::Strong)
        } else {
            warn!("Crypto digest unavailable, using weak fallback fingerprint hash");
            (rolling_hash(canonical.as_bytes()), SignatureStrength::Weak)
        };

        DeviceSignature {
            hash,
            strength,
            components,
            device_info,
        }
    }
}

fn sentinel(signal: &str, value: &str, err: &SignalError) -> String {
    debug!(signal, error = %err, "Fingerprint signal degraded to sentinel");
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSignals {
        webgl_fails: bool,
        audio_delay: Option<Duration>,
        crypto: bool,
        audio_calls: AtomicUsize,
    }

    impl FixedSignals {
        fn healthy() -> Self {
            Self {
                webgl_fails: false,
                audio_delay: None,
                crypto: true,
                audio_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SignalSource for FixedSignals {
        fn canvas(&self) -> Result<Vec<u8>, SignalError> {
            Ok(vec![12, 200, 7, 255, 0, 33])
        }

        fn webgl(&self) -> Result<WebGlSignals, SignalError> {
            if self.webgl_fails {
                return Err(SignalError::Unsupported("WebGL context".to_string()));
            }
            Ok(WebGlSignals {
                vendor: "Google Inc.".to_string(),
                renderer: "ANGLE (Apple M1)".to_string(),
            })
        }

        async fn audio(&self) -> Result<Vec<f32>, SignalError> {
            self.audio_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.audio_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(vec![0.25, -0.5, 0.125])
        }

        fn fonts(&self) -> Result<Vec<String>, SignalError> {
            Ok(vec!["Helvetica".to_string(), "Arial".to_string()])
        }

        fn navigator(&self) -> Result<NavigatorSignals, SignalError> {
            Ok(NavigatorSignals {
                language: "en-US".to_string(),
                platform: "MacIntel".to_string(),
                hardware_concurrency: 8,
                device_memory: Some(8.0),
                touch_support: false,
                cookie_enabled: true,
                do_not_track: None,
            })
        }

        fn screen(&self) -> Result<ScreenSignals, SignalError> {
            Ok(ScreenSignals {
                width: 1440,
                height: 900,
                color_depth: 24,
                timezone: "America/New_York".to_string(),
            })
        }

        fn user_agent(&self) -> Result<String, SignalError> {
            Ok("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string())
        }

        fn crypto_available(&self) -> bool {
            self.crypto
        }
    }

    #[tokio::test]
    async fn identical_signals_produce_identical_hashes() {
        let a = FingerprintCollector::new(Arc::new(FixedSignals::healthy())).collect().await;
        let b = FingerprintCollector::new(Arc::new(FixedSignals::healthy())).collect().await;

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert_eq!(a.strength, SignatureStrength::Strong);
        assert_eq!(a.components["fonts"], "Arial,Helvetica");
        assert_eq!(a.components["audio"], "0.875000");
        assert_eq!(a.device_info.os, "macOS");
        assert_eq!(a.device_info.screen_resolution, "1440x900");
    }

    #[tokio::test]
    async fn failing_signal_degrades_to_sentinel() {
        let source = FixedSignals {
            webgl_fails: true,
            ..FixedSignals::healthy()
        };
        let healthy = FingerprintCollector::new(Arc::new(FixedSignals::healthy())).collect().await;
        let degraded = FingerprintCollector::new(Arc::new(source)).collect().await;

        assert_eq!(degraded.components["webgl"], NO_WEBGL);
        assert_ne!(degraded.hash, healthy.hash);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_audio_signal_is_cut_off_by_the_timeout() {
        let source = FixedSignals {
            audio_delay: Some(Duration::from_secs(60)),
            ..FixedSignals::healthy()
        };
        let started = tokio::time::Instant::now();
        let signature = FingerprintCollector::new(Arc::new(source))
            .with_audio_timeout(Duration::from_millis(250))
            .collect()
            .await;

        assert_eq!(signature.components["audio"], AUDIO_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn weak_fallback_when_crypto_is_unavailable() {
        let source = FixedSignals {
            crypto: false,
            ..FixedSignals::healthy()
        };
        let a = FingerprintCollector::new(Arc::new(source)).collect().await;
        assert_eq!(a.strength, SignatureStrength::Weak);
        assert_eq!(a.hash.len(), 8);
        assert_eq!(a.hash, rolling_hash(canonical_string(&a.components).as_bytes()));
    }

    #[tokio::test]
    async fn cached_signature_skips_collection() {
        let source = Arc::new(FixedSignals::healthy());
        let collector = FingerprintCollector::new(source.clone())
            .with_cache(Arc::new(MemorySignatureCache::default()));

        let first = collector.collect().await;
        let second = collector.collect().await;

        assert_eq!(first, second);
        assert_eq!(source.audio_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rolling_hash_matches_known_values() {
        assert_eq!(rolling_hash(b""), "00000000");
        // 'a' = 97, 'b' = 98: 97 * 31 + 98 = 3105 = 0xc21
        assert_eq!(rolling_hash(b"ab"), "00000c21");
    }

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn font_detection_sees_width_changes() {
        let measure = |stack: &str| -> Option<f64> {
            if stack.starts_with("'Futura'") {
                Some(101.0)
            } else if stack.starts_with("'Broken'") {
                None
            } else {
                Some(100.0)
            }
        };
        let found = detect_fonts(&["Futura", "Comic Sans", "Broken"], measure);
        assert_eq!(found, vec!["Futura".to_string()]);
    }
}
