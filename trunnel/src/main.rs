use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use trunnel::cli;

fn init_tracing(args: &cli::Args) {
    let filter = if args.trace {
        EnvFilter::new("debug,trunnel=trace")
    } else if args.debug {
        EnvFilter::new("warn,trunnel=debug")
    } else if args.verbose {
        EnvFilter::new("warn,trunnel=info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(args.debug || args.trace)
        .compact()
        .init();
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_tracing(&args);
    cli::run(args)
}
