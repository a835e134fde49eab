//! Daemon entry point.
//!
//! Exit codes: 0 success, 1 configuration error, 2 authentication
//! failure, 3 unrecoverable store failure after rebuild.

mod runtime;

use core_runtime::logging::init_logging;
use core_runtime::FrameConfig;
use frame_traits::FrameError;
use tracing::error;

const EXIT_CONFIG: i32 = 1;
const EXIT_AUTH: i32 = 2;
const EXIT_STORE: i32 = 3;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());

    let config = match FrameConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("photoframed: {}", e);
            return EXIT_CONFIG;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("photoframed: {}", e);
        return EXIT_CONFIG;
    }

    match runtime::run(config).await {
        Ok(()) => 0,
        Err(e @ FrameError::Authentication(_)) => {
            error!(error = %e, "Authentication failed; generate fresh tokens and restart");
            EXIT_AUTH
        }
        Err(e @ FrameError::StoreIntegrity(_)) => {
            error!(error = %e, "Metadata store unusable even after rebuild");
            EXIT_STORE
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            EXIT_CONFIG
        }
    }
}
