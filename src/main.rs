use clap::Parser;

use overlayd::cli::Args;
use overlayd::server;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = args.validate() {
        eprintln!("overlayd: {e}");
        std::process::exit(2);
    }

    let default_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("OVERLAYD_LOG").unwrap_or_else(|_| default_level.to_string()))
        .init();

    if let Err(e) = server::serve(&args.addr, args.layers).await {
        tracing::error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
