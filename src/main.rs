use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "originhttpd", version, about = "Non-blocking, prefork, event-driven HTTP/1.x origin server")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match originhttpd::run(&cli.config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("originhttpd: {err}");
            ExitCode::FAILURE
        }
    }
}
