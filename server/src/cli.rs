//! # CLI Interface
//!
//! Command-line arguments for `firma-server`, via `clap` derive. Every `run`
//! flag can also come from a `FIRMA_*` environment variable.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use firma_core::config::{FirmaConfig, RecordBackend, RSA_KEY_BITS};

/// Firma credential server.
///
/// Issues self-signed signing credentials, authenticates users by proof of
/// key possession, and stores their signed PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "firma-server",
    about = "Firma credential issuance and login server",
    version,
    propagate_version = true
)]
pub struct FirmaServerCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server.
    Run(RunArgs),
    /// Create the storage layout under the data directory and exit.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Root of the storage layout (records, credentials, documents, database).
    #[arg(long, short = 'd', env = "FIRMA_DATA_DIR", default_value = "./firma-data")]
    pub data_dir: PathBuf,

    /// Address to bind the API and metrics listeners on.
    #[arg(long, env = "FIRMA_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// Port for the HTTP API.
    #[arg(long, short = 'p', env = "FIRMA_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "FIRMA_METRICS_PORT", default_value_t = 9100)]
    pub metrics_port: u16,

    /// Where user records live: `file` (one JSON per user) or `sled`.
    #[arg(long, env = "FIRMA_RECORD_BACKEND", default_value = "file")]
    pub record_backend: RecordBackend,

    /// RSA modulus size for issued keys. Values below 2048 are refused.
    #[arg(long, env = "FIRMA_RSA_BITS", default_value_t = RSA_KEY_BITS)]
    pub rsa_bits: u32,

    /// Session lifetime in seconds. Sessions never expire when unset.
    #[arg(long, env = "FIRMA_SESSION_TTL_SECS")]
    pub session_ttl_secs: Option<u64>,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "FIRMA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl RunArgs {
    pub fn to_config(&self) -> FirmaConfig {
        FirmaConfig {
            data_dir: self.data_dir.clone(),
            record_backend: self.record_backend,
            rsa_bits: self.rsa_bits,
            session_ttl: self.session_ttl_secs.map(Duration::from_secs),
        }
    }
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Data directory to initialize.
    #[arg(long, short = 'd', env = "FIRMA_DATA_DIR", default_value = "./firma-data")]
    pub data_dir: PathBuf,
}
