#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use wiretap_proxy::server::bootstrap;

#[derive(Parser)]
#[command(
    name = "wiretap-proxy",
    about = "Forward HTTP/HTTPS proxy with request/response capture"
)]
struct Cli {
    /// Path to proxy config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Listen address (overrides config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Admin API listen address for health/metrics (overrides config)
    #[arg(long)]
    admin_listen: Option<String>,

    /// Directory for captured request/response body files (overrides config)
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(bootstrap::run(bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
        admin_listen: cli.admin_listen,
        cache_dir: cli.cache_dir,
    }))
}
