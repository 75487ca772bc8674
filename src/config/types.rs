use serde::{Deserialize, Serialize};

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the proxy listener binds.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Address of the admin listener (`/health`, `/metrics`).
    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_admin_listen() -> String {
    "127.0.0.1:9091".to_string()
}

/// Body capture settings. When disabled, exchanges are still recorded and
/// published but no body files are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,

    /// Directory receiving `req-<uuid>` / `resp-<uuid>` files.
    #[serde(default = "default_capture_dir")]
    pub dir: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
            dir: default_capture_dir(),
        }
    }
}

fn default_capture_enabled() -> bool {
    true
}

fn default_capture_dir() -> String {
    "capture".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream TCP connect timeout in seconds. 0 disables the timeout.
    #[serde(default)]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 0,
        }
    }
}
