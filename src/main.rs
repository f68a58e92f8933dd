//! `tidytrail` - file organizer with an append-only audit trail and verified undo.
//!
//! See `README.md` for user documentation and `DESIGN.md` for architecture.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tidytrail::cli::{Cli, Command};
use tidytrail::exit_codes::exit;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let global = cli.global;
    let result = match cli.command {
        Command::Schema => {
            println!("{}", tidytrail::model::generate_schema());
            Ok(exit::SUCCESS)
        }
        Command::Organize(mut args) => {
            args.global = global;
            tidytrail::engine::organize(args)
        }
        Command::Runs(mut args) => {
            args.global = global;
            tidytrail::engine::runs(args)
        }
        Command::Undo(mut args) => {
            args.global = global;
            tidytrail::engine::undo(args)
        }
    };
    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            exit::for_error(&e)
        }
    };
    std::process::exit(exit_code);
}

/// Logs go to stderr. `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
