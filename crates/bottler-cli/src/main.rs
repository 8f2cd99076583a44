//! bottler CLI entry point.

// The binary reports errors and the panic message on stderr.
#![allow(clippy::print_stderr)]

use bottler_cli::cli::{self, EXIT_FAILURE, EXIT_SIGINT};
use bottler_cli::commands::{self, Context};
use bottler_cli::tracing::{LogConfig, init_tracing};
use bottler_core::Interrupt;

fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();
    let log_config = LogConfig {
        format: cli.log_format,
        level: cli.effective_level().into(),
        ..LogConfig::default()
    };
    if let Err(err) = init_tracing(&log_config) {
        eprintln!("{err:?}");
    }

    std::process::exit(run(cli));
}

fn run(cli: cli::Cli) -> i32 {
    let interrupt = match Interrupt::install() {
        Ok(interrupt) => interrupt,
        Err(err) => {
            eprintln!("{:?}", miette::Report::new(err));
            return EXIT_FAILURE;
        }
    };

    let result = Context::load(cli.config.as_deref(), interrupt.clone()).and_then(|ctx| {
        let mut stdout = std::io::stdout().lock();
        commands::execute(cli.command, &ctx, &mut stdout)
    });

    match result {
        Ok(status) => status.exit_code(),
        Err(_) if interrupt.is_set() => EXIT_SIGINT,
        Err(report) => {
            eprintln!("{report:?}");
            EXIT_FAILURE
        }
    }
}
