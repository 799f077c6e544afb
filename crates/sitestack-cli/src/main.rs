//! sitestack CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "sitestack")]
#[command(about = "Synthesize the site infrastructure", long_about = None)]
struct Cli {
    /// Path to the site configuration
    #[arg(long, global = true, env = "SITESTACK_CONFIG", default_value = "site.kdl")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the resource graph and write the cloud assembly
    Synth {
        /// Output directory
        #[arg(short, long, env = "SITESTACK_OUT", default_value = "cdk.out")]
        output: PathBuf,
        /// Print the template to stdout instead of writing files
        #[arg(long)]
        print: bool,
    },
    /// Validate the configuration and the resulting graph
    Validate,
    /// List every resource of the stack
    List,
    /// Print the build specification of the pipeline's build project
    Buildspec,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Synth { output, print } => {
            commands::synth::run(&cli.config, &output, print)?;
        }
        Commands::Validate => {
            commands::inspect::validate(&cli.config)?;
        }
        Commands::List => {
            commands::inspect::list(&cli.config)?;
        }
        Commands::Buildspec => {
            commands::inspect::buildspec(&cli.config)?;
        }
    }

    Ok(())
}
