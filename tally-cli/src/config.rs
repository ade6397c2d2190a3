use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_sync::FirestoreConfig;

use crate::state::ensure_tally_home;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub firebase: FirebaseSection,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirebaseSection {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub project_id: String,
    /// Firestore REST base, e.g. the emulator at http://localhost:8080/v1
    pub firestore_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// IANA zone whose calendar day is stamped on new expenses
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_currency() -> String {
    "₹".to_string()
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timezone: default_timezone(),
            currency: default_currency(),
        }
    }
}

impl Config {
    pub fn timezone(&self) -> Result<Tz> {
        self.sync
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone {:?} in config: {e}", self.sync.timezone))
    }

    pub fn firestore(&self) -> Result<FirestoreConfig> {
        if self.firebase.project_id.trim().is_empty() {
            bail!("firebase.project_id is not set; edit {}", config_path()?.display());
        }
        let mut fs_cfg = FirestoreConfig::new(self.firebase.project_id.trim())
            .with_poll_interval(Duration::from_millis(self.sync.poll_interval_ms.max(250)));
        if let Some(url) = &self.firebase.firestore_url {
            fs_cfg = fs_cfg.with_base_url(url.trim_end_matches('/'));
        }
        Ok(fs_cfg)
    }

    pub fn api_key(&self) -> Result<&str> {
        let key = self.firebase.api_key.trim();
        if key.is_empty() {
            bail!("firebase.api_key is not set; edit {}", config_path()?.display());
        }
        Ok(key)
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_tally_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&s).context("parse config.toml")
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config_to(&p, &Config::default())?;
    println!("Wrote {}", p.display());
    println!("Fill in firebase.api_key and firebase.project_id, then run: tally login");
    Ok(())
}
