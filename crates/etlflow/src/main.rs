mod commands;
mod context;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use context::GlobalArgs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "etl")]
#[command(about = "SQL based ETL with Apache Spark on Amazon EKS", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the plan and check it: templates, dependencies, logical ids
    Validate,
    /// Print the synthesized CloudFormation template
    Synth {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Synthesize the CDN template instead (origins must be set in the config)
        #[arg(long)]
        cdn: bool,
    },
    /// Show what a deploy would change since the last one
    Plan,
    /// Upload assets and deploy the stack, then the CDN stack when enabled
    Deploy {
        /// Run without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete the CDN stack and the main stack
    Destroy {
        /// Run without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the outputs of the deployed stacks
    Outputs {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "etl=debug,etlflow=debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("etlflow {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    init_tracing(cli.global.verbose);

    if let Err(e) = run(cli).await {
        eprintln!();
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = context::Context::load(&cli.global)?;

    match cli.command {
        Commands::Validate => commands::validate::handle(&ctx),
        Commands::Synth { output, cdn } => {
            commands::synth::handle(&ctx, output.as_deref(), cdn).await
        }
        Commands::Plan => commands::plan::handle(&ctx).await,
        Commands::Deploy { yes } => commands::deploy::handle(&ctx, yes).await,
        Commands::Destroy { yes } => commands::destroy::handle(&ctx, yes).await,
        Commands::Outputs { json } => commands::outputs::handle(&ctx, json).await,
        Commands::Version => unreachable!("Version is handled before context loading"),
    }
}
