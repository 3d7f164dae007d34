use clap::{Parser, Subcommand};
use std::path::PathBuf;
use timevault_cli::commands::{inspect, keygen, log, lookup, reconstruct, show, sweep};

#[derive(Parser)]
#[command(name = "timevault")]
#[command(about = "TimeVault operator tool: keys, vault inspection and offline decay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a node keypair and write the key files.
    Keygen {
        #[arg(long, short, default_value = "keys")]
        dir: PathBuf,
    },
    /// Summarize a vault directory.
    Inspect {
        #[arg(long, short, default_value = "data/timevault")]
        vault: PathBuf,
    },
    /// Print an anchor (or its stub) by id.
    Show {
        id: String,
        #[arg(long, short, default_value = "data/timevault")]
        vault: PathBuf,
    },
    /// Find a record by entropy hash.
    Lookup {
        digest: String,
        #[arg(long, short, default_value = "data/timevault")]
        vault: PathBuf,
    },
    /// Regenerate an anchor from its stub.
    Reconstruct {
        id: String,
        #[arg(long, short, default_value = "data/timevault")]
        vault: PathBuf,
        /// Persist the reconstruction and remove the stub
        #[arg(long)]
        write: bool,
    },
    /// Run one decay sweep with the default policy.
    Sweep {
        #[arg(long, short, default_value = "data/timevault")]
        vault: PathBuf,
        /// Evaluate expiry as of this RFC 3339 instant
        #[arg(long)]
        now: Option<String>,
    },
    /// List the intent log timeline.
    Log {
        #[arg(long, short, default_value = "data/intents.log")]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { dir } => keygen::run(&dir),
        Commands::Inspect { vault } => inspect::run(&vault),
        Commands::Show { id, vault } => show::run(&vault, &id),
        Commands::Lookup { digest, vault } => lookup::run(&vault, &digest),
        Commands::Reconstruct { id, vault, write } => reconstruct::run(&vault, &id, write),
        Commands::Sweep { vault, now } => sweep::run(&vault, now).map(|_| ()),
        Commands::Log { path } => log::run(&path),
    }
}
