use clap::Parser;
use hookrelay::config::{Args, Command};
use hookrelay::{Config, RunMode, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);

    let mode = match args.command.unwrap_or(Command::Relay) {
        Command::Relay => RunMode::All,
        Command::Serve => RunMode::Api,
        Command::Work => RunMode::Worker,
    };

    hookrelay::run(config, mode).await
}
