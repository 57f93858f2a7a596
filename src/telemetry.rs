//! Logging setup.
//!
//! Formats `tracing` events to stderr. The filter comes from `RUST_LOG` and defaults to `info`
//! for this crate and `warn` for everything else.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    name: Option<&'static str>,
    version: Option<&'static str>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = Some(version);
        self
    }

    fn default_filter(&self) -> String {
        let target = self.name.unwrap_or("delegated-recovery").replace('-', "_");
        format!("warn,{target}=info")
    }

    /// Installs the global subscriber. A second call is a no-op.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.default_filter()));
        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .is_ok();
        if installed {
            tracing::info!(
                name = self.name.unwrap_or_default(),
                version = self.version.unwrap_or_default(),
                "logging initialised"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_targets_crate() {
        let telemetry = Telemetry::new().with_name("delegated-recovery").with_version("0.1.0");
        assert_eq!(telemetry.default_filter(), "warn,delegated_recovery=info");
        assert_eq!(Telemetry::new().default_filter(), "warn,delegated_recovery=info");
    }
}
