pub mod toml_config;

use crate::utils::error::ConfigResult;
use crate::utils::validation::{validate_non_empty_string, validate_range, validate_url, Validate};
use std::time::Duration;

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

/// Connection settings for the eSIM API, injected into the transport at construction.
#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 不要把金鑰寫進日誌
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Validate for ApiConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_url("api.base_url", &self.base_url)?;
        validate_non_empty_string("api.api_key", &self.api_key)?;
        validate_range("api.timeout_seconds", self.timeout.as_secs(), 1, 300)?;
        Ok(())
    }
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "esim-checkout")]
#[command(about = "Browse eSIM bundles, buy one and fetch its install QR code")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "esim-checkout.toml")]
    pub config: String,

    /// Override api.base_url from the config file
    #[arg(long)]
    pub base_url: Option<String>,

    /// Override api.api_key from the config file
    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs and progress as JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List plans for an ISO country code or a region name
    Plans { region: String },
    /// Check that a bundle exists and can be bought
    Verify { bundle: String },
    /// Buy one bundle and wait for its eSIM profile
    Checkout {
        bundle: String,
        #[arg(long)]
        allow_reassign: bool,
    },
    /// Build an activation-code install URL by hand
    InstallUrl { smdp_address: String, matching_id: String },
}
