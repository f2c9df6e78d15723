use clap::Parser;
use std::process::ExitCode;

use sshrunner::config::{self, Cli, Environment};

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let request = match config::load(&cli, &Environment::from_process()) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("sshrunner: {}", e);
            return Ok(ExitCode::from(2));
        }
    };

    let verdict = sshrunner::run(request).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        for report in &verdict.reports {
            if report.ends_with('\n') {
                print!("{}", report);
            } else {
                println!("{}", report);
            }
        }
    }

    Ok(if verdict.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
