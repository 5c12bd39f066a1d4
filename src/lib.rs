pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::{CliConfig, Command};

pub use crate::adapters::HttpTransport;
pub use crate::config::{toml_config::TomlConfig, ApiConfig};
pub use crate::core::{
    catalog::CatalogClient,
    checkout::{CheckoutEngine, CheckoutOptions},
    classifier::{classify, RawError},
    install_url::synthesize,
    order::OrderSubmitter,
    poller::{CancellationToken, PollOutcome, ProvisioningPoller},
    verifier::BundleVerifier,
};
pub use crate::domain::model::{
    CheckoutOutcome, CheckoutProgress, CheckoutReceipt, CheckoutStep, InstallUrl, PollOptions,
};
pub use crate::domain::ports::TokioSleeper;
pub use crate::utils::error::{ClassifiedError, ConfigError, ErrorCategory, Result};
