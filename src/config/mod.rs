pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl ProxyConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used so the proxy starts with zero configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: ProxyConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            ProxyConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WIRETAP_LISTEN") {
            self.server.listen = v;
        }
        if let Ok(v) = std::env::var("WIRETAP_ADMIN_LISTEN") {
            self.server.admin_listen = v;
        }
        if let Ok(v) = std::env::var("WIRETAP_CAPTURE_DIR") {
            self.capture.dir = v;
        }
        if let Ok(v) = std::env::var("WIRETAP_CAPTURE_ENABLED") {
            self.capture.enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("WIRETAP_CONNECT_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.upstream.connect_timeout_secs = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.listen.is_empty() {
            anyhow::bail!("server.listen cannot be empty");
        }
        if self.capture.enabled && self.capture.dir.is_empty() {
            anyhow::bail!("capture.dir cannot be empty while capture is enabled");
        }
        Ok(())
    }
}
