use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use dredger::{Error, Result, cmd, ipc::Command};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the dredger application
#[derive(Parser)]
#[command(name = "dredger")]
#[command(about = "Hierarchical storage migration daemon and directory trawler")]
#[command(version)]
struct Cli {
   #[arg(short = 'v', long, action = ArgAction::Count, global = true, help = "More logging (repeatable)")]
   verbose: u8,

   #[command(subcommand)]
   command: Cmd,
}

/// Available subcommands for dredger
#[derive(Subcommand)]
enum Cmd {
   #[command(about = "Run the daemon: command server plus trawler")]
   Serve {
      #[arg(short = 'd', long = "dir", help = "Directory to trawl (default: config root)")]
      dir: Option<PathBuf>,

      #[arg(short = 'c', long, help = "Recheck interval, e.g. 1D or 2h30m")]
      check_interval: Option<String>,
   },

   #[command(about = "Trawl and watch a directory tree without serving commands")]
   Trawl {
      #[arg(short = 'd', long = "dir", help = "Directory to trawl (default: config root)")]
      dir: Option<PathBuf>,

      #[arg(short = 'c', long, help = "Recheck interval, e.g. 1D or 2h30m")]
      check_interval: Option<String>,
   },

   #[command(about = "Migrate a file, passing its open descriptor")]
   Migrate { path: PathBuf },

   #[command(about = "Check whether a file needs migrating")]
   Check { path: PathBuf },

   #[command(about = "Monitor accesses to a file")]
   Monitor { path: PathBuf },

   #[command(about = "Migrate a file by path")]
   Setup { path: PathBuf },

   #[command(about = "Stop a running daemon")]
   Shutdown,
}

const fn log_level(verbose: u8) -> Level {
   match verbose {
      0 => Level::WARN,
      1 => Level::INFO,
      _ => Level::DEBUG,
   }
}

#[tokio::main]
async fn main() {
   let cli = Cli::parse();

   tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(log_level(cli.verbose).into()))
      .init();

   if let Err(err) = run(cli).await {
      if !matches!(err, Error::Reported { .. }) {
         eprintln!("{err}");
      }
      std::process::exit(err.exit_code());
   }
}

async fn run(cli: Cli) -> Result<()> {
   match cli.command {
      Cmd::Serve { dir, check_interval } => cmd::serve::execute(dir, check_interval).await,
      Cmd::Trawl { dir, check_interval } => cmd::trawl::execute(dir, check_interval).await,
      Cmd::Migrate { path } => client(Command::Migrate, Some(path)).await,
      Cmd::Check { path } => client(Command::Check, Some(path)).await,
      Cmd::Monitor { path } => client(Command::Monitor, Some(path)).await,
      Cmd::Setup { path } => client(Command::Setup, Some(path)).await,
      Cmd::Shutdown => client(Command::Shutdown, None).await,
   }
}

async fn client(command: Command, path: Option<PathBuf>) -> Result<()> {
   tokio::task::spawn_blocking(move || cmd::client::execute(command, path))
      .await
      .map_err(|e| Error::Server { op: "client", reason: e.to_string() })?
}
