//! Cascade CLI - hierarchical audio code sampler

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::info;

use cascade::cli::commands::{self, SampleOverrides};
use cascade::cli::{Cli, Commands};
use cascade::jobs::JobParams;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    info!("Cascade v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Some(cmd) => handle_command(cmd),
        None => {
            println!("Cascade v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

fn handle_command(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Sample {
            config,
            mode,
            audio_file,
            codes_file,
            output_dir,
            artist,
            genre,
            lyrics,
        } => {
            let overrides = SampleOverrides {
                mode,
                audio_file,
                codes_file,
                output_dir,
            };
            commands::sample(config.as_deref(), overrides, &artist, &genre, &lyrics)
                .context("sampling failed")
        }
        Commands::Plan {
            total_length,
            n_ctx,
            hop_fraction,
        } => commands::plan(total_length, n_ctx, hop_fraction).context("invalid window plan"),
        Commands::Inspect { path } => commands::inspect(&path)
            .with_context(|| format!("could not inspect {}", path.display())),
        Commands::Submit {
            queue,
            artist,
            genre,
            lyrics,
            length,
            model,
            name,
        } => {
            let params = JobParams {
                artist,
                genre,
                lyrics,
                length,
                model,
                name,
            };
            commands::submit(&queue, params)
                .with_context(|| format!("could not queue job in {}", queue.display()))
        }
        Commands::Serve {
            queue,
            config,
            output_dir,
        } => commands::serve(&queue, config.as_deref(), output_dir.as_deref())
            .with_context(|| format!("queue {} failed", queue.display())),
    }
}
