//! Moderation Store
//!
//! Ban rules and feature flags that govern admission and relay filtering,
//! together with the TOML settings file they are loaded from and saved to.

use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Default maximum message length, effectively unbounded
pub const DEFAULT_MAX_LENGTH: usize = i32::MAX as usize;

/// In-memory ban rules and feature flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationStore {
    banned_ips: BTreeSet<String>,
    banned_words: BTreeSet<String>,
    max_length: usize,
    require_approval: bool,
    announce_on_join: bool,
}

impl Default for ModerationStore {
    fn default() -> Self {
        Self {
            banned_ips: BTreeSet::new(),
            banned_words: BTreeSet::new(),
            max_length: DEFAULT_MAX_LENGTH,
            require_approval: false,
            announce_on_join: false,
        }
    }
}

impl ModerationStore {
    pub fn is_banned(&self, host: &str) -> bool {
        self.banned_ips.contains(host)
    }

    pub fn banned_ips(&self) -> impl Iterator<Item = &str> {
        self.banned_ips.iter().map(String::as_str)
    }

    pub fn banned_words(&self) -> impl Iterator<Item = &str> {
        self.banned_words.iter().map(String::as_str)
    }

    /// First banned word contained in `text`, matched case-sensitively
    pub fn first_banned_word(&self, text: &str) -> Option<&str> {
        self.banned_words
            .iter()
            .find(|word| text.contains(word.as_str()))
            .map(String::as_str)
    }

    /// Whether `text` is longer than the configured limit, counted in characters
    pub fn exceeds_length(&self, text: &str) -> bool {
        text.chars().count() > self.max_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn require_approval(&self) -> bool {
        self.require_approval
    }

    pub fn announce_on_join(&self) -> bool {
        self.announce_on_join
    }

    /// Returns true if the IP was not banned before
    pub fn ban_ip(&mut self, ip: &str) -> bool {
        self.banned_ips.insert(ip.to_string())
    }

    /// Returns true if the IP was banned before
    pub fn unban_ip(&mut self, ip: &str) -> bool {
        self.banned_ips.remove(ip)
    }

    pub fn ban_word(&mut self, word: &str) -> bool {
        self.banned_words.insert(word.to_string())
    }

    pub fn unban_word(&mut self, word: &str) -> bool {
        self.banned_words.remove(word)
    }

    pub fn set_max_length(&mut self, max_length: usize) {
        self.max_length = max_length;
    }

    pub fn set_require_approval(&mut self, enabled: bool) {
        self.require_approval = enabled;
    }

    pub fn set_announce_on_join(&mut self, enabled: bool) {
        self.announce_on_join = enabled;
    }
}

/// On-disk layout of the moderation settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(rename = "ENTER_AFTER_PROMISE")]
    pub enter_after_promise: bool,
    #[serde(rename = "SHOW_ENTER_MESSAGE")]
    pub show_enter_message: bool,
    pub ban: BanSettings,
}

/// The `[ban]` table of the settings file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanSettings {
    pub ip: Vec<String>,
    pub words: Vec<String>,
    pub length: u64,
}

impl From<&ModerationStore> for Settings {
    fn from(store: &ModerationStore) -> Self {
        Settings {
            enter_after_promise: store.require_approval,
            show_enter_message: store.announce_on_join,
            ban: BanSettings {
                ip: store.banned_ips.iter().cloned().collect(),
                words: store.banned_words.iter().cloned().collect(),
                length: store.max_length as u64,
            },
        }
    }
}

impl From<Settings> for ModerationStore {
    fn from(settings: Settings) -> Self {
        ModerationStore {
            banned_ips: settings.ban.ip.into_iter().collect(),
            banned_words: settings.ban.words.into_iter().collect(),
            max_length: usize::try_from(settings.ban.length).unwrap_or(usize::MAX),
            require_approval: settings.enter_after_promise,
            announce_on_join: settings.show_enter_message,
        }
    }
}

/// Parse a settings document
pub fn parse_settings(text: &str) -> Result<ModerationStore> {
    let settings: Settings = toml::from_str(text)?;
    Ok(settings.into())
}

/// Load the moderation store from `path`.
///
/// A missing, unreadable or malformed file is replaced with the default
/// settings, which are then used.
pub fn load_settings(path: &Path) -> ModerationStore {
    let loaded = fs::read_to_string(path)
        .map_err(Into::into)
        .and_then(|text| parse_settings(&text));

    match loaded {
        Ok(store) => {
            info!("Loaded moderation settings from {}", path.display());
            store
        }
        Err(e) => {
            warn!(
                "Moderation settings at {} unusable ({}), writing defaults",
                path.display(),
                e
            );
            let store = ModerationStore::default();
            if let Err(e) = save_settings(path, &store) {
                warn!("Cannot write default settings to {}: {}", path.display(), e);
            }
            store
        }
    }
}

/// Persist the full moderation store to `path`
pub fn save_settings(path: &Path, store: &ModerationStore) -> Result<()> {
    let text = toml::to_string(&Settings::from(store))?;
    fs::write(path, text)?;
    info!("Saved moderation settings to {}", path.display());
    Ok(())
}
