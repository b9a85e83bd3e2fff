//! On-disk settings, following the same read-or-write-defaults pattern the
//! teacher uses for its own `coordinator-settings.toml`.

use crate::gateway::config::GatewayConfig;
use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const SETTINGS_FILE_NAME: &str = "gateway-settings.toml";

/// Top-level settings for the pub/sub bus, websocket gateway and mining
/// request handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub http_address: SocketAddr,
    pub max_pow_threads: usize,
    pub hathor_token_uid: String,
    pub ws_max_subs_addrs_conn: usize,
    pub ws_max_subs_addrs_empty: usize,

    // Special parameter, where the settings file is located.
    pub path: Option<PathBuf>,
}

impl Settings {
    fn default(http_address: SocketAddr) -> Self {
        let defaults = GatewayConfig::default();
        Self {
            http_address,
            max_pow_threads: 4,
            hathor_token_uid: defaults.hathor_token_uid,
            ws_max_subs_addrs_conn: defaults.max_subs_addrs_conn,
            ws_max_subs_addrs_empty: defaults.max_subs_addrs_empty,
            path: None,
        }
    }

    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_subs_addrs_conn: self.ws_max_subs_addrs_conn,
            max_subs_addrs_empty: self.ws_max_subs_addrs_empty,
            hathor_token_uid: self.hathor_token_uid.clone(),
            ..GatewayConfig::default()
        }
    }
}

async fn read_settings(data_dir: &Path) -> Result<Settings> {
    let settings_path = data_dir.join(SETTINGS_FILE_NAME);
    let data = fs::read_to_string(settings_path).await?;
    toml::from_str(&data).context("Unable to parse settings file")
}

impl Settings {
    pub async fn new(data_dir: &Path, http_address: SocketAddr) -> Self {
        match read_settings(data_dir).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Unable to read {SETTINGS_FILE_NAME} file, using defaults: {e}");
                let new = Settings {
                    path: Some(data_dir.join(SETTINGS_FILE_NAME)),
                    ..Settings::default(http_address)
                };
                if let Err(e) = new.write_to_file().await {
                    tracing::error!("Unable to write default settings to file: {e}");
                } else {
                    tracing::info!("Default settings written to file");
                }
                new
            }
        }
    }

    pub async fn write_to_file(&self) -> Result<()> {
        let data = toml::to_string_pretty(&self).context("Unable to serialize settings to TOML format")?;

        let settings_path = self.path.as_ref().context("Settings path not set")?.clone();
        if let Some(parent) = settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(settings_path).await?;
        file.write_all(data.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
