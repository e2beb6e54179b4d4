use assetrepo::app::{App, Command};
use assetrepo::config::Config;
use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "assetrepo")]
#[command(about = "Browse and download versioned asset repositories, with a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/assetrepo/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Log debug output
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  // Keep the guard alive so buffered log lines are flushed on exit
  let _guard = init_logging(&config, args.verbose)?;

  let mut app = App::new(config).await?;
  app.run(args.command).await
}

fn init_logging(config: &Config, verbose: bool) -> Result<Option<WorkerGuard>> {
  let default = if verbose {
    "assetrepo=debug"
  } else {
    "assetrepo=info"
  };
  let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default))?;

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "assetrepo.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}
