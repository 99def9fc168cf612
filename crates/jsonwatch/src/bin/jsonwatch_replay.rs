//! `jsonwatch-replay` - merge captured device lines and print the final tree.
//!
//! Usage:
//!   jsonwatch-replay [config.json] < capture.log
//!
//! Each stdin line is one device line. Rejected lines are reported on stderr
//! and skipped. Set `RUST_LOG=jsonwatch::traffic=debug` to trace every line.

use std::io::{self, Read, Write};

use jsonwatch::cli::replay;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                eprintln!("{path}: {e}");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let mut capture = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut capture) {
        eprintln!("{e}");
        std::process::exit(1);
    }

    match replay(config.as_deref(), &capture) {
        Ok(result) => {
            for (line, reason) in &result.rejected {
                eprintln!("line {line}: {reason}");
            }
            let mut stdout = io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{}", result.view) {
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
