//! Shared infrastructure for SWAP services
//!
//! - logging bootstrap
//! - layered configuration loading
//! - command-line base arguments and startup banner
//! - shutdown signal handling

pub mod bootstrap_args;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use config_loader::load_config;
pub use error::{Error, Result};
pub use logging::{init_logging, LoggingConfig};
pub use service_bootstrap::{print_startup_banner, ServiceInfo};
pub use shutdown::{shutdown_token, wait_for_shutdown};
