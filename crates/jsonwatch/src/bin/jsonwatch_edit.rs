//! `jsonwatch-edit` - validate an edit and print the line sent to the device.
//!
//! Usage:
//!   jsonwatch-edit <config.json> <path> <value>
//!
//! `value` is parsed as a JSON scalar; anything else is taken as a string.

use std::io::{self, Write};

use jsonwatch::cli::edit_line;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let (config_path, path, value) = match (args.get(1), args.get(2), args.get(3)) {
        (Some(c), Some(p), Some(v)) => (c, p, v),
        _ => {
            eprintln!("Usage: jsonwatch-edit <config.json> <path> <value>");
            std::process::exit(1);
        }
    };

    let config = match std::fs::read_to_string(config_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("{config_path}: {e}");
            std::process::exit(1);
        }
    };

    match edit_line(&config, path, value) {
        Ok(line) => {
            if let Err(e) = writeln!(io::stdout(), "{line}") {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
