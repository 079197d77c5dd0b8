//! dbbroker binary
//!
//! Log filtering follows `RUST_LOG` and defaults to `info`.

use std::io::Write;

use dbbroker::broker::ErrorResponse;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let response = match dbbroker::cli::run().await {
        Ok(response) => response,
        Err(e) => {
            let response = ErrorResponse::from(e);
            match serde_json::to_string(&response) {
                Ok(body) => eprintln!("{}", body),
                Err(_) => eprintln!("{}", response.error),
            }
            std::process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let written = serde_json::to_writer_pretty(&mut out, &response)
        .map_err(std::io::Error::from)
        .and_then(|_| writeln!(out));
    if let Err(e) = written {
        eprintln!("failed to write response: {}", e);
        std::process::exit(1);
    }
}
