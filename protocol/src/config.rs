//! # Protocol Configuration & Constants
//!
//! Every magic number the ledger depends on lives here, next to the
//! operator-facing [`LedgerConfig`] that is loaded from TOML.
//!
//! Most of these constants are not ours to choose. The tree depth, the key
//! layout, and the curve parameters are baked into the circuits that consume
//! our witnesses. Change one and every proof downstream stops verifying.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version string reported by the binary alongside the crate version.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Tree Parameters
// ---------------------------------------------------------------------------

/// Depth of the account tree in the reference circuit profile.
///
/// The processor proofs carry `TREE_DEPTH + 1` siblings, which is what the
/// circuits are compiled for.
pub const TREE_DEPTH: usize = 10;

/// Smallest depth we accept. A depth-1 tree can hold exactly one leaf,
/// which is not a ledger.
pub const MIN_TREE_DEPTH: usize = 2;

/// Largest depth we accept. Account indices stay below 2^31, so every
/// varint-encoded key fits its fixed-width slot with room to spare.
pub const MAX_TREE_DEPTH: usize = 32;

/// Number of field elements in an account's canonical encoding:
/// `[index, nonce, balance, ethAddr, ax, ay]`.
pub const ACCOUNT_FIELD_COUNT: usize = 6;

// ---------------------------------------------------------------------------
// Storage Layout
// ---------------------------------------------------------------------------

/// Reserved key holding the last assigned account index.
pub const KEY_LATEST_INDEX: &[u8] = b"l";

/// Reserved key present while the ledger is halted. Holds the reason.
pub const KEY_HALT: &[u8] = b"h";

/// One-byte namespace prefix for account records.
pub const PREFIX_ACCOUNT: u8 = b'a';

/// Width of the varint slot used for the last-index value and account keys.
pub const INDEX_SLOT_WIDTH: usize = 8;

/// sled tree holding account records and the index counter.
pub const ACCOUNTS_TREE: &str = "state";

/// sled tree holding sparse Merkle tree nodes and the root.
pub const SMT_TREE: &str = "smt";

// ---------------------------------------------------------------------------
// Witness Output
// ---------------------------------------------------------------------------

/// File name written inside each per-operation witness directory.
pub const WITNESS_FILE_NAME: &str = "input.json";

// ---------------------------------------------------------------------------
// Operator Configuration
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`LedgerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("tree_depth must be between 2 and 32, got {0}")]
    InvalidDepth(usize),
}

/// Logging section of the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// `"pretty"` or `"json"`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "rollup_node=info,rollup_protocol=info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Runtime configuration for a ledger instance.
///
/// ```toml
/// data_dir = "./state.db"
/// witness_dir = "./witness"
/// tree_depth = 10
///
/// [logging]
/// level = "rollup_protocol=debug"
/// format = "json"
/// ```
///
/// Every field has a default, so an empty file is a valid config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Directory of the sled database.
    pub data_dir: PathBuf,
    /// Root directory for per-operation witness files.
    pub witness_dir: PathBuf,
    /// Sparse Merkle tree depth. Must match the circuits.
    pub tree_depth: usize,
    /// Logging settings for the binary.
    pub logging: LoggingConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("state.db"),
            witness_dir: PathBuf::from("witness"),
            tree_depth: TREE_DEPTH,
            logging: LoggingConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Load and validate a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values the ledger cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TREE_DEPTH..=MAX_TREE_DEPTH).contains(&self.tree_depth) {
            return Err(ConfigError::InvalidDepth(self.tree_depth));
        }
        Ok(())
    }
}

/// Highest account index a tree of `depth` levels can address.
///
/// Leaves sit at most at level `depth - 1`, so two keys must diverge within
/// their low `depth - 1` bits. Indices `1..=2^(depth-1)` satisfy that, since
/// index 0 is never assigned.
pub fn account_capacity(depth: usize) -> u64 {
    1u64 << (depth - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LedgerConfig::default();
        assert_eq!(config.tree_depth, TREE_DEPTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: LedgerConfig = toml::from_str("").unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn load_overrides_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(
            &path,
            "data_dir = \"/tmp/ledger\"\ntree_depth = 12\n\n[logging]\nformat = \"json\"\n",
        )
        .unwrap();

        let config = LedgerConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.tree_depth, 12);
        assert_eq!(config.logging.format, "json");
        // Untouched fields keep their defaults.
        assert_eq!(config.witness_dir, PathBuf::from("witness"));
        assert_eq!(config.logging.level, LoggingConfig::default().level);
    }

    #[test]
    fn load_rejects_out_of_range_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "tree_depth = 1\n").unwrap();

        assert!(matches!(
            LedgerConfig::load(&path),
            Err(ConfigError::InvalidDepth(1))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = LedgerConfig::load(Path::new("/nonexistent/ledger.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn reference_depth_capacity() {
        assert_eq!(account_capacity(TREE_DEPTH), 512);
        assert_eq!(account_capacity(MIN_TREE_DEPTH), 2);
    }

    #[test]
    fn index_slot_fits_largest_capacity() {
        // A 7-bit-per-byte varint of the largest index must fit the slot.
        let bits = 64 - account_capacity(MAX_TREE_DEPTH).leading_zeros() as usize;
        assert!(bits.div_ceil(7) <= INDEX_SLOT_WIDTH);
    }
}
