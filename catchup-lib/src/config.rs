use serde::Deserialize;

/// Environment-driven options for the catch-up core, read from `CATCHUP_*`
/// keys.
#[derive(Deserialize, Debug, Clone)]
pub struct CatchupConfig {
    /// Chain node URLs, one worker per entry (comma separated).
    #[serde(default)]
    pub node_pool: Vec<String>,
    /// Per-worker outbound channel capacity.
    #[serde(default = "default_worker_chan_size")]
    pub worker_chan_size: usize,
    /// Flush floor: insert rows accumulated before a batch persistence.
    #[serde(default = "default_db_rows_threshold")]
    pub db_rows_threshold: usize,
    /// Memory ceiling: total rows collected before a forced flush.
    #[serde(default = "default_max_db_rows")]
    pub max_db_rows: usize,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            node_pool: Vec::new(),
            worker_chan_size: default_worker_chan_size(),
            db_rows_threshold: default_db_rows_threshold(),
            max_db_rows: default_max_db_rows(),
        }
    }
}

fn default_worker_chan_size() -> usize {
    64
}

fn default_db_rows_threshold() -> usize {
    1500
}

fn default_max_db_rows() -> usize {
    7500
}

pub fn get_catchup_config() -> anyhow::Result<CatchupConfig> {
    Ok(envy::prefixed("CATCHUP_").from_env::<CatchupConfig>()?)
}
