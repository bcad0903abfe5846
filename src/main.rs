use std::process;

use ddl_engine::cli::{self, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let args: Cli = cli::parse_args();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Failed to load configuration: {}", e);
            process::exit(2);
        }
    };

    // Held until exit so the file sink flushes.
    let _guard = match args.init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("✗ Failed to initialize logging: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = cli::run(&args, config).await {
        error!(error = %e, "ddlctl failed");
        eprintln!("✗ {}", e);
        process::exit(1);
    }
}
