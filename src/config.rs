//! Configuration types.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard bound on a single text-generation call.
    pub generation_timeout: Duration,
    /// Max tokens requested from the generation provider.
    pub generation_max_tokens: u32,
    /// Sampling temperature for generated replies.
    pub generation_temperature: f32,
    /// Offset used for time restrictions and daily counters when a rule
    /// does not declare its own timezone.
    pub default_utc_offset: FixedOffset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(10),
            generation_max_tokens: 300,
            generation_temperature: 0.7,
            default_utc_offset: utc(),
        }
    }
}

impl EngineConfig {
    /// Build a config from `AUTORESPONDER_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = env_var("AUTORESPONDER_GENERATION_TIMEOUT_SECS") {
            let secs: u64 = parse_value("AUTORESPONDER_GENERATION_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "AUTORESPONDER_GENERATION_TIMEOUT_SECS".into(),
                    message: "must be greater than zero".into(),
                });
            }
            config.generation_timeout = Duration::from_secs(secs);
        }

        if let Some(raw) = env_var("AUTORESPONDER_GENERATION_MAX_TOKENS") {
            config.generation_max_tokens =
                parse_value("AUTORESPONDER_GENERATION_MAX_TOKENS", &raw)?;
        }

        if let Some(raw) = env_var("AUTORESPONDER_GENERATION_TEMPERATURE") {
            let temperature: f32 = parse_value("AUTORESPONDER_GENERATION_TEMPERATURE", &raw)?;
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidValue {
                    key: "AUTORESPONDER_GENERATION_TEMPERATURE".into(),
                    message: format!("{temperature} is outside 0.0..=2.0"),
                });
            }
            config.generation_temperature = temperature;
        }

        if let Some(raw) = env_var("AUTORESPONDER_UTC_OFFSET") {
            config.default_utc_offset =
                parse_utc_offset(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: "AUTORESPONDER_UTC_OFFSET".into(),
                    message: format!("'{raw}' is not a UTC offset like +02:00"),
                })?;
        }

        Ok(config)
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn with_default_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.default_utc_offset = offset;
        self
    }
}

/// Parse a fixed UTC offset: `UTC`, `Z`, `+05:30`, `-0800` or `+2`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("gmt")
    {
        return Some(utc());
    }

    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };

    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?)
    } else if rest.len() == 4 {
        (rest.get(..2)?.parse::<i32>().ok()?, rest.get(2..)?.parse::<i32>().ok()?)
    } else {
        (rest.parse::<i32>().ok()?, 0)
    };

    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.generation_timeout, Duration::from_secs(10));
        assert_eq!(config.generation_max_tokens, 300);
        assert_eq!(config.default_utc_offset.local_minus_utc(), 0);
    }

    #[test]
    fn parses_named_utc() {
        assert_eq!(parse_utc_offset("UTC").map(|o| o.local_minus_utc()), Some(0));
        assert_eq!(parse_utc_offset("z").map(|o| o.local_minus_utc()), Some(0));
    }

    #[test]
    fn parses_colon_offsets() {
        assert_eq!(
            parse_utc_offset("+05:30").map(|o| o.local_minus_utc()),
            Some(5 * 3600 + 30 * 60)
        );
        assert_eq!(
            parse_utc_offset("-08:00").map(|o| o.local_minus_utc()),
            Some(-8 * 3600)
        );
    }

    #[test]
    fn parses_compact_and_hour_only_offsets() {
        assert_eq!(
            parse_utc_offset("-0800").map(|o| o.local_minus_utc()),
            Some(-8 * 3600)
        );
        assert_eq!(parse_utc_offset("+2").map(|o| o.local_minus_utc()), Some(7200));
    }

    #[test]
    fn rejects_garbage_offsets() {
        assert!(parse_utc_offset("Europe/Paris").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
        assert!(parse_utc_offset("+01:75").is_none());
        assert!(parse_utc_offset("").is_none());
    }

    #[test]
    fn builder_overrides() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let config = EngineConfig::default()
            .with_generation_timeout(Duration::from_millis(50))
            .with_default_utc_offset(offset);
        assert_eq!(config.generation_timeout, Duration::from_millis(50));
        assert_eq!(config.default_utc_offset, offset);
    }
}
