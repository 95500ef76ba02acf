use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use moodgate_core::{Emotion, FrameOutcome};
use moodgate_store::{RecordFile, ValidationStore};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod script;

use config::Config;

#[derive(Parser)]
#[command(name = "moodgate", about = "Face tracking with a happy-sad-happy liveness challenge")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines detection script through the tracker
    Replay {
        /// Script file, one frame per line
        script: PathBuf,
        /// Process every Nth frame (overrides MOODGATE_FRAME_STRIDE)
        #[arg(short, long)]
        stride: Option<usize>,
    },
    /// List validated faces
    Records,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Replay { script, stride } => replay(&config, &script, stride).await?,
        Commands::Records => {
            let file = RecordFile::open(&config.records_path)?;
            if file.records().is_empty() {
                println!("No validated faces in {}", file.path().display());
            }
            for record in file.records() {
                println!("{:<24} {}", record.name, record.timestamp);
            }
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn replay(config: &Config, script: &std::path::Path, stride: Option<usize>) -> Result<()> {
    let frames = script::load_script(script)
        .with_context(|| format!("cannot replay {}", script.display()))?;
    let store = ValidationStore::open(&config.records_path, &config.image_dir)?;
    let stride = stride.unwrap_or(config.frame_stride);
    tracing::info!(
        frames = frames.len(),
        stride,
        images = %store.image_dir().display(),
        "replay starting"
    );
    let handle = engine::spawn_engine(store, config.tracker, stride)?;

    let mut step = 0;
    for frame in frames {
        for _ in 0..frame.repeat {
            if let Some(outcome) = handle.process(frame.clone()).await? {
                report(&outcome, &mut step);
            }
        }
    }

    let status = handle.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn report(outcome: &FrameOutcome, step: &mut u8) {
    if let Some(advisory) = outcome.advisory() {
        println!("{advisory}");
    }
    let Some(summary) = outcome.summary() else {
        return;
    };

    if summary.validation_step != *step {
        *step = summary.validation_step;
        println!("{}", step_prompt(*step, summary.expected_emotion));
    }
    if let Some(record) = &summary.saved {
        println!("Saved {} at {}", record.name, record.timestamp);
    }
    for name in &summary.retired {
        println!("Done with {name}");
    }
    for name in &summary.expired {
        println!("Lost track of {name}");
    }
}

fn step_prompt(step: u8, expected: Option<Emotion>) -> String {
    match (step, expected) {
        (0, _) => "Waiting for a steady face.".to_string(),
        (_, Some(emotion)) => format!("Step {step}/3: show a {emotion} face."),
        (_, None) => "Validated.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_prompt_names_next_emotion() {
        assert_eq!(step_prompt(0, None), "Waiting for a steady face.");
        assert_eq!(step_prompt(2, Some(Emotion::Sad)), "Step 2/3: show a sad face.");
        assert_eq!(step_prompt(3, Some(Emotion::Happy)), "Step 3/3: show a happy face.");
        assert_eq!(step_prompt(4, None), "Validated.");
    }
}
