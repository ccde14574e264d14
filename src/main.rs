use clap::Parser;

use floodgate::runtime::{self, Args};
use floodgate::utils::logging;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _log_guard = logging::init();

    if let Err(err) = runtime::run(args).await {
        tracing::error!("run failed: {err:#}");
        std::process::exit(1);
    }
}
