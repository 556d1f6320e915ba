//! Pocket CLI: run the on-device generation pipeline from the command line.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pocket_core::PipelineConfig;
use tracing_subscriber::EnvFilter;

mod cmd {
    pub mod inspect;
    pub mod run;
}

#[derive(Parser)]
#[command(
    name = "pocket",
    about = "Pocket - on-device text generation over GGUF models",
    version
)]
struct Cli {
    /// JSON file overriding pipeline limits.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a response for a prompt.
    Run {
        /// Path to a local GGUF model file.
        #[arg(short, long)]
        model: PathBuf,

        /// Prompt text (the user message when a format is chosen).
        #[arg(short, long)]
        prompt: String,

        /// Prompt layout: raw, auto, or one of phi3, chatml, alpaca,
        /// llama2, llama3, mistral.
        #[arg(long, default_value = "raw")]
        format: String,

        /// System instruction for formatted prompts.
        #[arg(long, default_value = "")]
        system: String,

        /// JSON array of earlier turns ({"role": "user"|"assistant", "content": ...}).
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Validate a model file and show how it would be run.
    Inspect {
        /// Path to a local GGUF model file.
        #[arg(short, long)]
        model: PathBuf,
    },
    /// Print the generation profile of every model family.
    Profiles,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            model,
            prompt,
            format,
            system,
            history,
        } => cmd::run::execute(
            config,
            &model,
            &prompt,
            &format,
            &system,
            history.as_deref(),
        ),
        Commands::Inspect { model } => {
            cmd::inspect::execute(&model, &config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Profiles => {
            cmd_profiles();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_profiles() {
    println!("Pocket v{}", pocket_core::VERSION);
    println!();
    for family in pocket_core::ModelFamily::ALL {
        let p = family.profile();
        println!("{family}:");
        println!("  context size:  {}", p.context_size);
        println!("  batch size:    {}", p.batch_size);
        println!("  temperature:   {}", p.temperature);
        println!("  top-k:         {}", p.top_k);
        println!("  top-p:         {}", p.top_p);
        println!("  max tokens:    {}", p.max_tokens);
    }
}
