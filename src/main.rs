// src/main.rs

use clap::Parser;
use dolt::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match dolt::commands::run(&cli) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("error: {}", err);
            // 1 for user or data errors, 2 for internal failures
            let code = if err.is_user_error() { 1 } else { 2 };
            std::process::exit(code);
        }
    }
}
