//! Application settings.
//!
//! Read from `settings.toml` (or the file passed with `--settings`), then
//! overridden by `DOMPET__SECTION__KEY` environment variables.

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_SETTINGS_PATH: &str = "settings";

#[derive(Debug, Parser)]
#[command(name = "dompet", version, about = "Personal expense tracker bot")]
struct Args {
    /// Settings file, with or without the `.toml` extension.
    #[arg(long, env = "DOMPET_SETTINGS")]
    settings: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct App {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    #[default]
    Memory,
    Sqlite(String),
}

#[derive(Debug, Deserialize)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
    /// Shared secret accepted on the mirror webhook besides per-user ones.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub token: String,
    #[serde(default)]
    pub allowed_users: Vec<u64>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

fn default_timezone() -> String {
    "Asia/Jakarta".to_string()
}

fn default_confirm_timeout() -> u64 {
    5
}

fn default_sync_interval() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
pub struct Extractor {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct Sheets {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub database: Database,
    pub server: Option<Server>,
    pub telegram: Option<Telegram>,
    pub extractor: Option<Extractor>,
    pub sheets: Option<Sheets>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let args = Args::parse();
        Self::load(args.settings.as_deref().unwrap_or(DEFAULT_SETTINGS_PATH))
    }

    fn load(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("DOMPET")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("telegram.allowed_users")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
