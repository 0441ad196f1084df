//! Daemon configuration.
//!
//! A plain `key = value` text file with `#` comments. Recognized keys:
//!
//! | Key | Effect |
//! |-----|--------|
//! | `atc/name/<anything>` | register a permitted ATC callsign (value = callsign) |
//! | `listen/<anything>` | add a listening endpoint (value = `host` or `host:port`) |
//! | `keyfile` | path to the TLS private key (PEM) |
//! | `certfile` | path to the TLS certificate (PEM) |
//! | `cafile` | optional path to a CA trust file (PEM) |
//! | `blocklist` | path to the address blocklist file |
//!
//! Without a config file the daemon listens on `localhost:17622`, knows the
//! single ATC callsign `TEST`, and expects `cpdlcd_key.pem` /
//! `cpdlcd_cert.pem` in the working directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use aerolink_models::Callsign;

/// Default TCP port of the routing daemon.
pub const DEFAULT_PORT: u16 = 17622;

/// Errors raised while loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("can't open {path}: {source}")]
    Io {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line was not of `key = value` form.
    #[error("{path}: parsing error on line {line}")]
    Syntax {
        /// Path of the offending file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// The same ATC callsign was registered twice.
    #[error("duplicate ATC entry {callsign}")]
    DuplicateAtc {
        /// The repeated callsign.
        callsign: Callsign,
    },

    /// A directive value failed model validation.
    #[error(transparent)]
    Model(#[from] aerolink_models::ModelError),
}

/// Fully-resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Permitted ATC callsigns; logons from these are tagged in the logs.
    pub atc_callsigns: HashSet<Callsign>,
    /// Listen directives, `host` or `host:port`.
    pub listen: Vec<String>,
    /// Port applied to listen directives without an explicit port.
    pub default_port: u16,
    /// TLS private key (PEM).
    pub keyfile: PathBuf,
    /// TLS certificate (PEM).
    pub certfile: PathBuf,
    /// Optional CA trust file (PEM).
    pub cafile: Option<PathBuf>,
    /// Optional address blocklist file.
    pub blocklist: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            atc_callsigns: HashSet::from(["TEST".parse().expect("valid callsign literal")]),
            listen: vec!["localhost".to_string()],
            default_port: DEFAULT_PORT,
            keyfile: PathBuf::from("cpdlcd_key.pem"),
            certfile: PathBuf::from("cpdlcd_cert.pem"),
            cafile: None,
            blocklist: None,
        }
    }
}

impl DaemonConfig {
    /// Load the configuration from `path`.
    ///
    /// Missing `atc/name/*` or `listen/*` directives fall back to the
    /// defaults (`TEST`, `localhost`).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut atc_callsigns = HashSet::new();
        let mut listen = Vec::new();
        let mut config = Self {
            atc_callsigns: HashSet::new(),
            listen: Vec::new(),
            ..Self::default()
        };

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Syntax {
                    path: path.to_path_buf(),
                    line: idx + 1,
                });
            };
            let key = key.trim();
            let value = value.trim();

            if key.starts_with("atc/name/") {
                let callsign: Callsign = value.parse()?;
                if !atc_callsigns.insert(callsign.clone()) {
                    return Err(ConfigError::DuplicateAtc { callsign });
                }
            } else if key.starts_with("listen/") {
                listen.push(value.to_string());
            } else {
                match key {
                    "keyfile" => config.keyfile = PathBuf::from(value),
                    "certfile" => config.certfile = PathBuf::from(value),
                    "cafile" => config.cafile = Some(PathBuf::from(value)),
                    "blocklist" => config.blocklist = Some(PathBuf::from(value)),
                    _ => {
                        return Err(ConfigError::Syntax {
                            path: path.to_path_buf(),
                            line: idx + 1,
                        });
                    }
                }
            }
        }

        if atc_callsigns.is_empty() {
            atc_callsigns.insert("TEST".parse().expect("valid callsign literal"));
        }
        if listen.is_empty() {
            listen.push("localhost".to_string());
        }
        config.atc_callsigns = atc_callsigns;
        config.listen = listen;
        Ok(config)
    }
}
