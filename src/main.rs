use clap::Parser as _;
use shelly_bridge_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Bridge(commands::bridge::Args),
    IdMap(commands::id_map::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description =
        std::env::var("SHELLY_BRIDGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = filter_description
        .parse::<tracing_subscriber::filter::targets::Targets>()
        .unwrap_or_else(|e| {
            eprintln!("w/invalid SHELLY_BRIDGE_LOG filter ({e}), falling back to `info`");
            tracing_subscriber::filter::targets::Targets::new()
                .with_default(tracing::level_filters::LevelFilter::INFO)
        });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Bridge(args) => end(commands::bridge::run(args)),
        Commands::IdMap(args) => end(commands::id_map::run(args)),
    }
}
