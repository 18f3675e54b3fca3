use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};

use crate::error::{AniResolveError, Result};

/// Header carrying the proxy's api key.
pub const PROXY_KEY_HEADER: &str = "x-api-key";

lazy_static! {
    static ref VALID_URL: Regex = Regex::new(r"^https?://.+").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyConfig {
    Single {
        url: String,
        key: String,
    },
    /// Always at least two urls; cycled every `rotate_interval`.
    Rotating {
        urls: Vec<String>,
        key: String,
        rotate_interval: Duration,
    },
}

impl ProxyConfig {
    pub fn single(url: impl Into<String>, key: impl Into<String>) -> Self {
        ProxyConfig::Single {
            url: url.into(),
            key: key.into(),
        }
    }

    pub fn rotating(urls: Vec<String>, key: impl Into<String>, rotate_interval: Duration) -> Self {
        ProxyConfig::Rotating {
            urls,
            key: key.into(),
            rotate_interval,
        }
    }

    /// Picks the variant by url count; `None` when the list is empty.
    pub fn from_urls(urls: Vec<String>, key: String, rotate_interval: Duration) -> Option<Self> {
        match urls.len() {
            0 => None,
            1 => urls
                .into_iter()
                .next()
                .map(|url| ProxyConfig::Single { url, key }),
            _ => Some(ProxyConfig::Rotating {
                urls,
                key,
                rotate_interval,
            }),
        }
    }

    pub fn urls(&self) -> Vec<&str> {
        match self {
            ProxyConfig::Single { url, .. } => vec![url.as_str()],
            ProxyConfig::Rotating { urls, .. } => urls.iter().map(String::as_str).collect(),
        }
    }

    pub fn key(&self) -> &str {
        match self {
            ProxyConfig::Single { key, .. } | ProxyConfig::Rotating { key, .. } => key,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (index, url) in self.urls().into_iter().enumerate() {
            if !VALID_URL.is_match(url) {
                return Err(AniResolveError::InvalidProxyUrl {
                    index,
                    url: url.to_string(),
                });
            }
        }

        if let ProxyConfig::Rotating {
            urls,
            rotate_interval,
            ..
        } = self
        {
            if urls.len() < 2 {
                return Err(AniResolveError::validation(
                    "rotating proxy needs at least two urls",
                ));
            }
            if rotate_interval.is_zero() {
                return Err(AniResolveError::validation(
                    "proxy rotate interval must be positive",
                ));
            }
        }

        Ok(())
    }
}

/// The proxy a request is rewritten through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveProxy {
    pub url: String,
    pub key: String,
}

impl ActiveProxy {
    pub fn rewrite(&self, url: &str) -> String {
        format!("{}{}", self.url, url)
    }
}

/// The installed proxy plus the generation of the install that wrote it.
#[derive(Debug, Default)]
struct ProxySlot {
    generation: u64,
    proxy: Option<ActiveProxy>,
}

/// Proxy state shared by every clone of one client.
///
/// Requests read the active proxy once, when they are built, so a rotation landing mid-flight
/// never mixes the url of one proxy with the key of another. Every install or stop bumps the
/// generation under the write lock; a rotation task only writes while its generation is
/// current, so a tick racing a newer install is dropped.
#[derive(Debug, Default)]
pub(crate) struct ProxyState {
    slot: Arc<RwLock<ProxySlot>>,
    rotation: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyState {
    pub fn snapshot(&self) -> Option<ActiveProxy> {
        self.slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .proxy
            .clone()
    }

    pub fn install(&self, config: ProxyConfig) -> Result<()> {
        if config.urls().is_empty() {
            return Ok(());
        }
        config.validate()?;

        let runtime = match &config {
            ProxyConfig::Rotating { .. } => Some(tokio::runtime::Handle::try_current().map_err(
                |_| AniResolveError::validation("rotating proxy requires a tokio runtime"),
            )?),
            ProxyConfig::Single { .. } => None,
        };

        // Held for the whole install so concurrent installs cannot interleave.
        let mut rotation = self.lock_rotation();
        abort(rotation.take());

        match (config, runtime) {
            (ProxyConfig::Single { url, key }, _) => {
                info!(proxy = %url, "installing proxy");
                begin_generation(&self.slot, Some(ActiveProxy { url, key }));
            }
            (
                ProxyConfig::Rotating {
                    urls,
                    key,
                    rotate_interval,
                },
                Some(runtime),
            ) => {
                info!(proxies = urls.len(), interval_ms = rotate_interval.as_millis() as u64, "starting proxy rotation");
                let generation = begin_generation(
                    &self.slot,
                    Some(ActiveProxy {
                        url: urls[0].clone(),
                        key: key.clone(),
                    }),
                );

                let slot = Arc::clone(&self.slot);
                *rotation = Some(runtime.spawn(async move {
                    let mut ticker = interval_at(Instant::now() + rotate_interval, rotate_interval);
                    let mut index = 0;
                    loop {
                        ticker.tick().await;
                        index = (index + 1) % urls.len();
                        let next = ActiveProxy {
                            url: urls[index].clone(),
                            key: key.clone(),
                        };
                        if !rotate(&slot, generation, next) {
                            break;
                        }
                        debug!(proxy = %urls[index], "rotated proxy");
                    }
                }));
            }
            (ProxyConfig::Rotating { .. }, None) => {}
        }

        Ok(())
    }

    /// Stops the rotation timer; the proxy it last installed stays active.
    pub fn stop_rotation(&self) {
        let mut rotation = self.lock_rotation();
        if let Some(handle) = rotation.take() {
            debug!("stopping proxy rotation");
            abort(Some(handle));
            let mut slot = write_slot(&self.slot);
            slot.generation += 1;
        }
    }

    pub fn active_rotations(&self) -> usize {
        self.lock_rotation()
            .as_ref()
            .filter(|handle| !handle.is_finished())
            .map_or(0, |_| 1)
    }

    fn lock_rotation(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.rotation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for ProxyState {
    fn drop(&mut self) {
        self.stop_rotation();
    }
}

fn abort(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        handle.abort();
    }
}

fn write_slot(slot: &RwLock<ProxySlot>) -> RwLockWriteGuard<'_, ProxySlot> {
    slot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Starts a new generation holding `proxy`.
fn begin_generation(slot: &RwLock<ProxySlot>, proxy: Option<ActiveProxy>) -> u64 {
    let mut slot = write_slot(slot);
    slot.generation += 1;
    slot.proxy = proxy;
    slot.generation
}

/// Writes `proxy` only while `generation` is still the installed one.
fn rotate(slot: &RwLock<ProxySlot>, generation: u64, proxy: ActiveProxy) -> bool {
    let mut slot = write_slot(slot);
    if slot.generation != generation {
        return false;
    }
    slot.proxy = Some(proxy);
    true
}
