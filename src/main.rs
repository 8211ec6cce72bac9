//! Invoice Vault entry point
//!
//! Parses arguments and dispatches through [`cli::run`]. On failure the
//! error is printed as JSON on stdout and as text on stderr, and the process
//! exits non-zero.

use invoice_vault::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        if let Err(write_err) = cli::write_error(e.code_str(), e.message()) {
            eprintln!("{}", write_err);
        }
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
