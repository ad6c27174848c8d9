//! Command-line arguments shared by SWAP services
//!
//! Services flatten [`ServiceArgs`] into their own clap parser.

use std::path::PathBuf;

use clap::Args;

/// Common service startup arguments
#[derive(Debug, Clone, Default, Args)]
pub struct ServiceArgs {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, env = "SWAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level for the service targets (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Disable colored output (useful for log files)
    #[arg(long)]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> Option<tracing::Level> {
        let level = self.log_level.as_deref()?;
        Some(match level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        service: ServiceArgs,
    }

    #[test]
    fn test_default_args() {
        let cli = TestCli::try_parse_from(["svc"]).unwrap();
        assert!(cli.service.log_level.is_none());
        assert!(!cli.service.validate);
        assert!(cli.service.parse_log_level().is_none());
    }

    #[test]
    fn test_parse_flags() {
        let cli = TestCli::try_parse_from([
            "svc",
            "--config",
            "gw.yaml",
            "-l",
            "WARN",
            "--no-color",
            "--validate",
        ])
        .unwrap();
        assert_eq!(cli.service.config, Some(PathBuf::from("gw.yaml")));
        assert_eq!(cli.service.parse_log_level(), Some(tracing::Level::WARN));
        assert!(cli.service.no_color);
        assert!(cli.service.validate);
    }
}
