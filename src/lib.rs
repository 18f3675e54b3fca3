// src/lib.rs

pub mod anikai;
pub mod animeon;
pub mod dom;
pub mod env;
pub mod error;
pub mod http;
pub mod kisskh;
pub mod kkey;
mod kkey_tables;
pub mod model;
pub mod platforms;
pub mod provider;
pub mod proxy;
pub mod schema;
pub mod servers;
mod utils;

use tracing::info;

pub use crate::anikai::AnimeKai;
pub use crate::animeon::AnimeOn;
pub use crate::env::ResolverConfig;
pub use crate::error::{AniResolveError, Result};
pub use crate::http::{with_cancellation, HttpClient, HttpClientOptions};
pub use crate::kisskh::KissKh;
pub use crate::kkey::{derive_key, KeyConstants, KkeyCipher, ResourceType};
pub use crate::platforms::{Dailymotion, Invidious, Twitch};
pub use crate::provider::Provider;
pub use crate::proxy::ProxyConfig;
pub use crate::servers::{MegaUp, StreamingServer, SubOrDub};

/// Every provider built from one [`ResolverConfig`].
#[derive(Debug)]
pub struct AniResolver {
    pub anikai: AnimeKai,
    pub kisskh: KissKh,
    pub animeon: AnimeOn,
    pub invidious: Invidious,
    pub dailymotion: Dailymotion,
    /// Only present when Twitch credentials are configured.
    pub twitch: Option<Twitch>,
}

impl AniResolver {
    /// Builds the providers and installs the configured proxy on each of them.
    ///
    /// A rotating proxy needs a running tokio runtime.
    pub fn new(config: ResolverConfig) -> Result<Self> {
        let resolver = AniResolver {
            anikai: AnimeKai::from_config(&config)?,
            kisskh: KissKh::from_config(&config)?,
            animeon: AnimeOn::from_config(&config)?,
            invidious: Invidious::from_config(&config)?,
            dailymotion: Dailymotion::from_config(&config)?,
            twitch: Twitch::from_config(&config)?,
        };

        if let Some(proxy) = config.proxy {
            resolver.set_proxy(proxy)?;
        }

        info!(providers = resolver.providers().len(), "resolver ready");
        Ok(resolver)
    }

    pub fn from_env() -> Result<Self> {
        AniResolver::new(ResolverConfig::from_env()?)
    }

    pub fn providers(&self) -> Vec<&dyn Provider> {
        let mut providers: Vec<&dyn Provider> = vec![
            &self.anikai,
            &self.kisskh,
            &self.animeon,
            &self.invidious,
            &self.dailymotion,
        ];
        if let Some(twitch) = &self.twitch {
            providers.push(twitch);
        }
        providers
    }

    /// Case-insensitive lookup by display name.
    pub fn provider(&self, name: &str) -> Option<&dyn Provider> {
        self.providers()
            .into_iter()
            .find(|provider| provider.name().eq_ignore_ascii_case(name))
    }

    /// Validates once, then installs `config` on every provider.
    pub fn set_proxy(&self, config: ProxyConfig) -> Result<()> {
        config.validate()?;
        for provider in self.providers() {
            provider.set_proxy(config.clone())?;
        }
        Ok(())
    }
}
