// env.rs

use std::env;
use std::fmt;
use std::time::Duration;

use dotenvy::dotenv;

use crate::{
    error::{AniResolveError, Result},
    kkey::{parse_round_keys, KkeyCipher, KKEY_IV, ROUND_KEY_WORDS},
    proxy::ProxyConfig,
    utils::parse_u64,
};

pub const DEFAULT_ANIKAI_URL: &str = "https://anikai.to";
pub const DEFAULT_ENC_DEC_URL: &str = "https://enc-dec.app/api";
pub const DEFAULT_KISSKH_URL: &str = "https://kisskh.co";
pub const DEFAULT_INVIDIOUS_URL: &str = "https://iv.ggtyler.dev";
pub const DEFAULT_DAILYMOTION_API_URL: &str = "https://api.dailymotion.com";
pub const DEFAULT_ANIMEON_URL: &str = "https://animeon.club";
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_ROTATE_INTERVAL_MS: u64 = 5_000;

#[allow(non_camel_case_types)]
#[derive(Debug)]
pub enum EnvVar {
    ANIKAI_URL,
    ENC_DEC_URL,
    KISSKH_URL,
    INVIDIOUS_URL,
    DAILYMOTION_API_URL,
    ANIMEON_URL,
    HTTP_TIMEOUT_MS,
    PROXY_URLS,
    PROXY_KEY,
    PROXY_ROTATE_INTERVAL_MS,
    ANIKAI_TOKEN_SOURCE,
    KISSKH_ROUND_KEYS,
    TWITCH_CLIENT_ID,
    TWITCH_OAUTH_TOKEN,
}

impl EnvVar {
    // Convert EnvVar to the corresponding environment variable key
    fn as_str(&self) -> &'static str {
        match self {
            EnvVar::ANIKAI_URL => "ANIKAI_URL",
            EnvVar::ENC_DEC_URL => "ENC_DEC_URL",
            EnvVar::KISSKH_URL => "KISSKH_URL",
            EnvVar::INVIDIOUS_URL => "INVIDIOUS_URL",
            EnvVar::DAILYMOTION_API_URL => "DAILYMOTION_API_URL",
            EnvVar::ANIMEON_URL => "ANIMEON_URL",
            EnvVar::HTTP_TIMEOUT_MS => "HTTP_TIMEOUT_MS",
            EnvVar::PROXY_URLS => "PROXY_URLS",
            EnvVar::PROXY_KEY => "PROXY_KEY",
            EnvVar::PROXY_ROTATE_INTERVAL_MS => "PROXY_ROTATE_INTERVAL_MS",
            EnvVar::ANIKAI_TOKEN_SOURCE => "ANIKAI_TOKEN_SOURCE",
            EnvVar::KISSKH_ROUND_KEYS => "KISSKH_ROUND_KEYS",
            EnvVar::TWITCH_CLIENT_ID => "TWITCH_CLIENT_ID",
            EnvVar::TWITCH_OAUTH_TOKEN => "TWITCH_OAUTH_TOKEN",
        }
    }

    // Fetch the environment variable value and return it as a String
    pub fn get_config(&self) -> String {
        dotenv().ok();
        env::var(self.as_str()).unwrap_or_default()
    }

    fn get_or(&self, default: &str) -> String {
        let value = self.get_config();
        if value.trim().is_empty() {
            default.to_string()
        } else {
            value.trim().to_string()
        }
    }

    fn get_millis_or(&self, default: u64) -> Result<Duration> {
        let value = self.get_config();
        if value.trim().is_empty() {
            return Ok(Duration::from_millis(default));
        }
        parse_u64(value.trim())
            .map(Duration::from_millis)
            .map_err(|_| {
                AniResolveError::validation(format!("{} must be milliseconds", self.as_str()))
            })
    }
}

/// How AnimeKai derives the `_` query token for its ajax endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSourceKind {
    /// In-process kkey cipher
    Local,
    /// Remote `enc-kai` endpoint of the decode service
    Remote,
}

impl TokenSourceKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "local" => Ok(TokenSourceKind::Local),
            "remote" => Ok(TokenSourceKind::Remote),
            other => Err(AniResolveError::validation(format!(
                "ANIKAI_TOKEN_SOURCE must be `local` or `remote`, got `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwitchCredentials {
    pub client_id: String,
    pub oauth_token: String,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub anikai_url: String,
    pub enc_dec_url: String,
    pub kisskh_url: String,
    pub invidious_url: String,
    pub dailymotion_api_url: String,
    pub animeon_url: String,
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
    pub token_source: TokenSourceKind,
    /// Replaces the built-in kkey schedule when the site rotates its key.
    pub kkey_round_keys: Option<[u32; ROUND_KEY_WORDS]>,
    pub twitch: Option<TwitchCredentials>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            anikai_url: DEFAULT_ANIKAI_URL.to_string(),
            enc_dec_url: DEFAULT_ENC_DEC_URL.to_string(),
            kisskh_url: DEFAULT_KISSKH_URL.to_string(),
            invidious_url: DEFAULT_INVIDIOUS_URL.to_string(),
            dailymotion_api_url: DEFAULT_DAILYMOTION_API_URL.to_string(),
            animeon_url: DEFAULT_ANIMEON_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            proxy: None,
            token_source: TokenSourceKind::Local,
            kkey_round_keys: None,
            twitch: None,
        }
    }
}

impl ResolverConfig {
    /// Reads every `EnvVar` (and `.env`, if present), falling back to the defaults.
    pub fn from_env() -> Result<Self> {
        let proxy_urls: Vec<String> = EnvVar::PROXY_URLS
            .get_config()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let rotate_interval = EnvVar::PROXY_ROTATE_INTERVAL_MS.get_millis_or(DEFAULT_ROTATE_INTERVAL_MS)?;
        let proxy = ProxyConfig::from_urls(proxy_urls, EnvVar::PROXY_KEY.get_config(), rotate_interval);

        let round_keys = EnvVar::KISSKH_ROUND_KEYS.get_config();
        let kkey_round_keys = if round_keys.trim().is_empty() {
            None
        } else {
            Some(parse_round_keys(&round_keys)?)
        };

        let client_id = EnvVar::TWITCH_CLIENT_ID.get_config();
        let oauth_token = EnvVar::TWITCH_OAUTH_TOKEN.get_config();
        let twitch = if client_id.is_empty() || oauth_token.is_empty() {
            None
        } else {
            Some(TwitchCredentials {
                client_id,
                oauth_token,
            })
        };

        Ok(ResolverConfig {
            anikai_url: EnvVar::ANIKAI_URL.get_or(DEFAULT_ANIKAI_URL),
            enc_dec_url: EnvVar::ENC_DEC_URL.get_or(DEFAULT_ENC_DEC_URL),
            kisskh_url: EnvVar::KISSKH_URL.get_or(DEFAULT_KISSKH_URL),
            invidious_url: EnvVar::INVIDIOUS_URL.get_or(DEFAULT_INVIDIOUS_URL),
            dailymotion_api_url: EnvVar::DAILYMOTION_API_URL.get_or(DEFAULT_DAILYMOTION_API_URL),
            animeon_url: EnvVar::ANIMEON_URL.get_or(DEFAULT_ANIMEON_URL),
            timeout: EnvVar::HTTP_TIMEOUT_MS.get_millis_or(DEFAULT_TIMEOUT_MS)?,
            proxy,
            token_source: TokenSourceKind::from_str(&EnvVar::ANIKAI_TOKEN_SOURCE.get_config())?,
            kkey_round_keys,
            twitch,
        })
    }
}

impl ResolverConfig {
    pub fn kkey_cipher(&self) -> KkeyCipher {
        match self.kkey_round_keys {
            Some(round_keys) => KkeyCipher::from_round_keys(round_keys, KKEY_IV),
            None => KkeyCipher::default(),
        }
    }
}

impl fmt::Display for ResolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AnimeKai URL: {}", self.anikai_url)?;
        writeln!(f, "Decode service URL: {}", self.enc_dec_url)?;
        writeln!(f, "KissKH URL: {}", self.kisskh_url)?;
        writeln!(f, "Timeout: {}ms", self.timeout.as_millis())?;
        writeln!(f, "Token source: {:?}", self.token_source)?;
        let schedule = if self.kkey_round_keys.is_some() { "custom" } else { "built-in" };
        writeln!(f, "kkey schedule: {}", schedule)?;
        match &self.proxy {
            // keys are never printed
            Some(proxy) => write!(f, "Proxy urls: {:?}", proxy.urls()),
            None => write!(f, "Proxy urls: none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_source_parsing() {
        assert_eq!(TokenSourceKind::from_str("").unwrap(), TokenSourceKind::Local);
        assert_eq!(
            TokenSourceKind::from_str(" Remote ").unwrap(),
            TokenSourceKind::Remote
        );
        assert!(TokenSourceKind::from_str("carrier-pigeon")
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn defaults_match_upstream_constants() {
        let config = ResolverConfig::default();
        assert_eq!(config.anikai_url, "https://anikai.to");
        assert_eq!(config.timeout, Duration::from_millis(15_000));
        assert!(config.proxy.is_none());
        assert!(config.twitch.is_none());
    }

    #[test]
    fn custom_schedule_changes_the_cipher() {
        let mut round_keys = [0u32; ROUND_KEY_WORDS];
        round_keys[0] = 1;
        let custom = ResolverConfig {
            kkey_round_keys: Some(round_keys),
            ..ResolverConfig::default()
        };
        let constants = crate::kkey::KeyConstants::default();
        let kind = crate::kkey::ResourceType::Video;

        assert_ne!(
            custom.kkey_cipher().derive_key(7i64, kind, &constants),
            ResolverConfig::default().kkey_cipher().derive_key(7i64, kind, &constants)
        );
        assert!(custom.to_string().contains("kkey schedule: custom"));
    }

    #[test]
    fn display_hides_proxy_key() {
        let config = ResolverConfig {
            proxy: ProxyConfig::from_urls(
                vec!["https://p.example".into()],
                "secret-key".into(),
                Duration::from_millis(DEFAULT_ROTATE_INTERVAL_MS),
            ),
            ..ResolverConfig::default()
        };
        let shown = config.to_string();
        assert!(shown.contains("https://p.example"));
        assert!(!shown.contains("secret-key"));
    }
}
