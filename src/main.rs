use anyhow::Result;
use clap::Parser;

use cachecmd::cli::Cli;
use cachecmd::cli_utils::report_error;
use cachecmd::error::FAILURE_EXIT_CODE;
use cachecmd::{logging, CacheCmd, CacheCmdConfig, ProcessLauncher};

/// Exit code for an invocation without a command.
const USAGE_EXIT_CODE: i32 = 2;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&format!("{:#}", e));
            FAILURE_EXIT_CODE
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    if cli.command.is_empty() {
        eprintln!("{}", Cli::usage());
        return Ok(USAGE_EXIT_CODE);
    }

    let config = CacheCmdConfig::load(cli.config.as_deref())?;
    let options = config.resolve(cli.overrides())?;

    let Some(cachecmd) = CacheCmd::from_argv(options, cli.command) else {
        eprintln!("{}", Cli::usage());
        return Ok(USAGE_EXIT_CODE);
    };

    let launcher = ProcessLauncher::current();
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    match cachecmd
        .run(&mut stdout, &mut stderr, &launcher, interrupted())
        .await
    {
        Ok(outcome) => Ok(outcome.exit_code),
        Err(e) => {
            report_error(&e);
            Ok(e.exit_code())
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler can't be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
