mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "recast",
    version,
    about = "Run Recast record transforms locally"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay JSON-lines records through a transform module
    Run {
        /// Path to the compiled transform module (.wasm or .wat)
        module: PathBuf,
        /// Path to transform YAML file
        #[arg(short, long)]
        config: PathBuf,
        /// JSON-lines input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Write dead-lettered records to this JSON-lines file
        #[arg(long)]
        dead_letters: Option<PathBuf>,
        /// Deploy-time env value, repeatable
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },
    /// Validate transform configuration and, optionally, a module
    Check {
        /// Path to transform YAML file
        config: PathBuf,
        /// Instantiate and set up this module as part of the check
        #[arg(long)]
        module: Option<PathBuf>,
        /// Deploy-time env value, repeatable
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            module,
            config,
            input,
            dead_letters,
            env,
        } => {
            commands::run::execute(
                &module,
                &config,
                input.as_deref(),
                dead_letters.as_deref(),
                &env,
            )
            .await
        }
        Commands::Check {
            config,
            module,
            env,
        } => commands::check::execute(&config, module.as_deref(), &env),
    }
}
