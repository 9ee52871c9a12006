//! Runtime configuration for the ledger service and command-line tools.
//!
//! Every value can come from a command-line flag or a `STUDY_CHAIN_*`
//! environment variable. Mining parameters are handed to the ledger at
//! construction and recorded on each block, so there is no process-wide
//! difficulty to change behind a running service.

use clap::Args;
use thiserror::Error;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::{Ledger, MemoryStore, Miner, MiningError, MiningParams, SledStore, StorageError};

/// Default leading zero hex characters required of new blocks
pub const DEFAULT_DIFFICULTY: u32 = 3;

/// Default number of nonces tried before mining gives up
pub const DEFAULT_MAX_NONCE: u64 = 1_000_000;

/// Errors raised when the configuration cannot produce a working ledger
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid mining configuration: {0}")]
    Mining(#[from] MiningError),

    #[error("Failed to open chain store: {0}")]
    Storage(#[from] StorageError),
}

/// Ledger and service settings
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Directory holding the chain database
    #[arg(long, global = true, env = "STUDY_CHAIN_DATA_DIR", default_value = "data/study_chain")]
    pub data_dir: PathBuf,

    /// Address the HTTP service listens on
    #[arg(long, global = true, env = "STUDY_CHAIN_BIND_ADDR", default_value = "127.0.0.1:8080")]
    pub bind_addr: SocketAddr,

    /// Leading zero hex characters required of new blocks
    #[arg(long, global = true, env = "STUDY_CHAIN_DIFFICULTY", default_value_t = DEFAULT_DIFFICULTY)]
    pub difficulty: u32,

    /// Number of nonces tried before mining gives up
    #[arg(long, global = true, env = "STUDY_CHAIN_MAX_NONCE", default_value_t = DEFAULT_MAX_NONCE)]
    pub max_nonce: u64,

    /// Worker threads per nonce search
    #[arg(long, global = true, env = "STUDY_CHAIN_MINING_THREADS", default_value_t = 1)]
    pub mining_threads: usize,

    /// Seconds a single mining call may run
    #[arg(long, global = true, env = "STUDY_CHAIN_MINING_TIMEOUT_SECS")]
    pub mining_timeout_secs: Option<u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            data_dir: PathBuf::from("data/study_chain"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            difficulty: DEFAULT_DIFFICULTY,
            max_nonce: DEFAULT_MAX_NONCE,
            mining_threads: 1,
            mining_timeout_secs: None,
        }
    }
}

impl LedgerConfig {
    /// Mining parameters applied to every new block
    pub fn mining_params(&self) -> MiningParams {
        let params = MiningParams::new(self.difficulty, self.max_nonce);
        match self.mining_timeout_secs {
            Some(secs) => params.with_timeout(Duration::from_secs(secs)),
            None => params,
        }
    }

    /// Checks the settings without opening anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.mining_params().validate()?;
        Ok(())
    }

    /// Builds the nonce search described by the settings
    pub fn miner(&self) -> Result<Miner, ConfigError> {
        Ok(Miner::with_threads(self.mining_threads)?)
    }

    /// Opens a ledger over the sled database in `data_dir`
    pub fn open_ledger(&self) -> Result<Ledger, ConfigError> {
        self.validate()?;
        let store = SledStore::open(&self.data_dir)?;
        Ok(Ledger::new(Arc::new(store), self.miner()?, self.mining_params()))
    }

    /// Builds a ledger whose chains live only as long as the process
    pub fn memory_ledger(&self) -> Result<Ledger, ConfigError> {
        self.validate()?;
        Ok(Ledger::new(
            Arc::new(MemoryStore::new()),
            self.miner()?,
            self.mining_params(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        config: LedgerConfig,
    }

    #[test]
    fn test_defaults_match_flags() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();

        assert_eq!(cli.config, LedgerConfig::default());
    }

    #[test]
    fn test_parse_flags() {
        let cli = TestCli::try_parse_from([
            "test",
            "--difficulty",
            "5",
            "--max-nonce",
            "42",
            "--mining-threads",
            "4",
            "--mining-timeout-secs",
            "30",
            "--bind-addr",
            "0.0.0.0:9000",
        ])
        .unwrap();

        assert_eq!(cli.config.difficulty, 5);
        assert_eq!(cli.config.max_nonce, 42);
        assert_eq!(cli.config.mining_threads, 4);
        assert_eq!(cli.config.bind_addr.port(), 9000);
        assert_eq!(
            cli.config.mining_params(),
            MiningParams::new(5, 42).with_timeout(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_validate_rejects_impossible_mining() {
        let too_hard = LedgerConfig {
            difficulty: 65,
            ..Default::default()
        };
        let no_attempts = LedgerConfig {
            max_nonce: 0,
            ..Default::default()
        };

        assert!(matches!(too_hard.validate(), Err(ConfigError::Mining(_))));
        assert!(matches!(no_attempts.memory_ledger(), Err(ConfigError::Mining(_))));
        assert!(LedgerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_open_ledger_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            data_dir: dir.path().join("chains"),
            difficulty: 1,
            ..Default::default()
        };

        let ledger = config.open_ledger().unwrap();

        assert_eq!(ledger.params(), MiningParams::new(1, DEFAULT_MAX_NONCE));
        assert!(ledger.owners().unwrap().is_empty());
    }
}
