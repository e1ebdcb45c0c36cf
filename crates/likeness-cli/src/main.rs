use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::{GridSize, MatchThreshold};
use likeness_engine::{spawn_engine, AuthOutcome, Config, EngineError, EngineHandle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "likeness", about = "Likeness face image verification CLI")]
struct Cli {
    /// TOML config file (defaults to $LIKENESS_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an image as the reference face, replacing any previous one
    Enroll {
        /// Captured image file
        image: PathBuf,
    },
    /// Verify an image against the enrolled face
    Verify {
        /// Captured image file
        image: PathBuf,
        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare two image files directly, without the enrolled face
    Compare {
        reference: PathBuf,
        probe: PathBuf,
        /// Override the grid edge length
        #[arg(long)]
        size: Option<u32>,
        /// Override the match threshold
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Show the enrolled reference and active settings
    Status,
    /// Remove the enrolled face
    Clear,
}

const EXIT_NOT_VERIFIED: u8 = 1;
const EXIT_NOT_ENROLLED: u8 = 2;
const EXIT_FAILURE: u8 = 3;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Compare {
            reference,
            probe,
            size,
            threshold,
        } => compare(&config, &reference, &probe, size, threshold).await,
        command => run_engine_command(&config, command).await,
    }
}

async fn run_engine_command(config: &Config, command: Commands) -> Result<ExitCode> {
    let store = config.open_store()?;
    let options = config.compare_options()?;
    let engine = spawn_engine(store, options, config.queue_depth)?;

    match command {
        Commands::Enroll { image } => {
            let bytes = read_image(&image).await?;
            match engine.enroll(bytes).await {
                Ok(receipt) => {
                    println!("Enrolled face stored at {}", receipt.location);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => Ok(report(&e)),
            }
        }
        Commands::Verify { image, json } => verify(&engine, &image, json).await,
        Commands::Status => match engine.status().await {
            Ok(status) => {
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => Ok(report(&e)),
        },
        Commands::Clear => match engine.clear().await {
            Ok(true) => {
                println!("Enrolled face removed");
                Ok(ExitCode::SUCCESS)
            }
            Ok(false) => {
                println!("No enrolled face to remove");
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => Ok(report(&e)),
        },
        Commands::Compare {
            reference,
            probe,
            size,
            threshold,
        } => compare(config, &reference, &probe, size, threshold).await,
    }
}

async fn verify(engine: &EngineHandle, image: &Path, json: bool) -> Result<ExitCode> {
    let bytes = read_image(image).await?;
    let outcome = match engine.authenticate(bytes).await {
        Ok(outcome) => outcome,
        Err(e) => return Ok(report(&e)),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.user_message());
    }
    Ok(ExitCode::from(outcome_exit_code(&outcome)))
}

async fn compare(
    config: &Config,
    reference: &Path,
    probe: &Path,
    size: Option<u32>,
    threshold: Option<f64>,
) -> Result<ExitCode> {
    let mut options = config.compare_options()?;
    if let Some(size) = size {
        options.size = GridSize::new(size)?;
    }
    if let Some(threshold) = threshold {
        options.threshold = MatchThreshold::new(threshold)?;
    }

    let reference = read_image(reference).await?;
    let probe = read_image(probe).await?;
    let verdict = tokio::task::spawn_blocking(move || {
        likeness_core::evaluate(&reference, &probe, &options)
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(if verdict.matched {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_NOT_VERIFIED)
    })
}

async fn read_image(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

/// Log the detail, show the user only the short message.
fn report(err: &EngineError) -> ExitCode {
    tracing::error!(error = %err, "request failed");
    eprintln!("{}", err.user_message());
    ExitCode::from(EXIT_FAILURE)
}

fn outcome_exit_code(outcome: &AuthOutcome) -> u8 {
    match outcome.decision() {
        Some(true) => 0,
        Some(false) => EXIT_NOT_VERIFIED,
        None => EXIT_NOT_ENROLLED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use likeness_core::Denial;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_verify_with_global_config() {
        let cli = Cli::try_parse_from(["likeness", "verify", "probe.jpg", "--json", "-c", "l.toml"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("l.toml")));
        assert!(matches!(cli.command, Commands::Verify { json: true, .. }));
    }

    #[test]
    fn test_outcome_exit_codes() {
        assert_eq!(outcome_exit_code(&AuthOutcome::NoReferenceEnrolled), EXIT_NOT_ENROLLED);
        assert_eq!(
            outcome_exit_code(&AuthOutcome::Rejected {
                score: None,
                denial: Denial::Decode
            }),
            EXIT_NOT_VERIFIED
        );
    }
}
