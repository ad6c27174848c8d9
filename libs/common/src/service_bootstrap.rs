//! Service startup helpers: metadata and banner

use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "swapgw")
    pub name: String,
    /// Service version
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print the startup banner for a service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "swapgw" => {
            r#"
 ███████╗██╗    ██╗ █████╗ ██████╗  ██████╗ ██╗    ██╗
 ██╔════╝██║    ██║██╔══██╗██╔══██╗██╔════╝ ██║    ██║
 ███████╗██║ █╗ ██║███████║██████╔╝██║  ███╗██║ █╗ ██║
 ╚════██║██║███╗██║██╔══██║██╔═══╝ ██║   ██║██║███╗██║
 ███████║╚███╔███╔╝██║  ██║██║     ╚██████╔╝╚███╔███╔╝
 ╚══════╝ ╚══╝╚══╝ ╚═╝  ╚═╝╚═╝      ╚═════╝  ╚══╝╚══╝
            "#
        },
        _ => "",
    };

    if !banner.is_empty() {
        info!("{}", banner);
    }
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_info_creation() {
        let service = ServiceInfo::new("swapgw", "0.1.0", "SWAP gateway");
        assert_eq!(service.name, "swapgw");
        assert_eq!(service.version, "0.1.0");
        assert_eq!(service.description, "SWAP gateway");
    }
}
