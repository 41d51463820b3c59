use std::path::PathBuf;

use catchup_lib::store::StoreDisabler;
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use tracing::level_filters::LevelFilter;

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct CliConfig {
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default = "default_rust_log")]
    pub rust_log: LevelFilter,
    #[serde(default = "default_catchup_db_root")]
    pub catchup_db_root: PathBuf,
    #[serde(default)]
    pub catchup_disable_blocks: bool,
    #[serde(default)]
    pub catchup_disable_receipts: bool,
    #[serde(default)]
    pub catchup_disable_logs: bool,
}

impl CliConfig {
    pub fn disabler(&self) -> StoreDisabler {
        StoreDisabler {
            blocks_disabled: self.catchup_disable_blocks,
            receipts_or_txns_disabled: self.catchup_disable_receipts,
            logs_disabled: self.catchup_disable_logs,
        }
    }
}

fn default_rust_log() -> LevelFilter {
    LevelFilter::INFO
}

fn default_catchup_db_root() -> PathBuf {
    std::env::home_dir().unwrap().join(".epoch-catchup")
}

pub fn get_cli_config() -> anyhow::Result<CliConfig> {
    Ok(envy::from_env::<CliConfig>()?)
}
