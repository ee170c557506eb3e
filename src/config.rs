//! Access gate configuration loaded from the environment

use std::net::SocketAddr;
use std::time::Duration;

use crate::access_code::AccessCodeScheme;

const DEFAULT_ANCHOR: &str = "2026-01-01T00:00:00Z";
const DEFAULT_WINDOW_MINUTES: u64 = 180;

/// Settings for issuing and checking access codes
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Anchor epoch in milliseconds; codes encode their expiry relative to it
    pub anchor_ms: i64,
    /// How long a freshly issued code stays valid
    pub window: Duration,
    pub scheme: AccessCodeScheme,
    pub bind_addr: SocketAddr,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            anchor_ms: parse_anchor(DEFAULT_ANCHOR).unwrap_or_default(),
            window: Duration::from_secs(DEFAULT_WINDOW_MINUTES * 60),
            scheme: AccessCodeScheme::default(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl GateConfig {
    /// Load config from environment variables, falling back to defaults for
    /// anything missing or unparseable
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let anchor_ms = match env_trimmed("ACCESS_CODE_ANCHOR") {
            Some(raw) => parse_anchor(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    value = %raw,
                    "ACCESS_CODE_ANCHOR is not RFC 3339, using {}",
                    DEFAULT_ANCHOR
                );
                defaults.anchor_ms
            }),
            None => defaults.anchor_ms,
        };

        let window = env_parsed::<u64>("ACCESS_CODE_WINDOW_MINUTES")
            .filter(|minutes| *minutes > 0)
            .and_then(|minutes| {
                let secs = minutes.checked_mul(60);
                if secs.is_none() {
                    tracing::warn!(minutes, "ACCESS_CODE_WINDOW_MINUTES is too large, using default");
                }
                secs
            })
            .map(Duration::from_secs)
            .unwrap_or(defaults.window);

        let scheme = AccessCodeScheme {
            tag: env_trimmed("ACCESS_CODE_TAG")
                .map(|tag| tag.to_lowercase())
                .unwrap_or(defaults.scheme.tag),
            fragment_len: env_parsed("ACCESS_CODE_FRAGMENT_LEN")
                .unwrap_or(defaults.scheme.fragment_len),
            field_width: defaults.scheme.field_width,
            max_attempts: env_parsed("ACCESS_CODE_MAX_ATTEMPTS")
                .unwrap_or(defaults.scheme.max_attempts),
        };

        let bind_addr = env_parsed("BIND_ADDR").unwrap_or(defaults.bind_addr);

        tracing::info!(
            anchor_ms,
            window_minutes = window.as_secs() / 60,
            tag = %scheme.tag,
            fragment_len = scheme.fragment_len,
            %bind_addr,
            "Access gate config loaded"
        );

        Self {
            anchor_ms,
            window,
            scheme,
            bind_addr,
        }
    }

    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Parse an RFC 3339 timestamp into epoch milliseconds
pub fn parse_anchor(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_trimmed(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(value = %raw, "Ignoring unparseable {}", name);
            None
        }
    }
}
