//! seshat CLI: run the built-in demo traces and inspect what was learned.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::EnvFilter;

use seshat::chunk::{ChunkSettings, LearnResult};
use seshat::demo;
use seshat::kernel::Agent;

#[derive(Parser)]
#[command(name = "seshat", version, about = "Explanation-based rule learning engine")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a built-in demo trace and print the learned rules.
    Demo {
        /// Which trace to run: passthrough, tower, or all.
        #[arg(long, default_value = "all")]
        trace: String,

        /// Goal-stack depth for the tower trace.
        #[arg(long, default_value = "3")]
        depth: u32,

        /// Print statistics as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective settings as TOML.
    Settings,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => ChunkSettings::load(path)?,
        None => ChunkSettings::default(),
    };

    match cli.command {
        Commands::Settings => {
            print!("{}", settings.to_toml());
        }
        Commands::Demo { trace, depth, json } => {
            let traces: Vec<&str> = match trace.as_str() {
                "all" => vec!["passthrough", "tower"],
                other => vec![other],
            };
            for name in traces {
                let mut agent = Agent::new(settings.clone());
                let inst = match name {
                    "tower" => demo::tower(&mut agent, depth)?,
                    _ => demo::passthrough(&mut agent)?,
                };
                println!("# trace: {name}");
                report(&mut agent, inst);
                if json {
                    println!("{}", agent.chunking_stats().to_json());
                } else {
                    println!("{}", agent.chunking_stats());
                }
            }
        }
    }
    Ok(())
}

fn report(agent: &mut Agent, inst: seshat::instantiation::InstId) {
    for result in agent.learn_from(inst) {
        match result {
            LearnResult::Chunk { production } | LearnResult::Justification { production } => {
                if let Some(text) = agent.render_production(production) {
                    println!("{text}\n");
                }
            }
            LearnResult::Duplicate { existing } => {
                println!("# duplicate of an existing rule ({existing})\n");
            }
            LearnResult::Skipped { reason } => {
                println!("# skipped: {reason:?}\n");
            }
            LearnResult::Abandoned { error } => {
                println!("# abandoned: {error}\n");
            }
        }
    }
}
