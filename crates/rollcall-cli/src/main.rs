use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{Encoder, EncodingError, GroupLabels, PrecomputedEncoder, RecognitionError};
use rollcall_engine::{spawn_engine, Config, EngineError};
use rollcall_store::EnrollmentRequest;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", version, about = "Rollcall attendance biometric matcher")]
struct Cli {
    /// TOML config file (overrides ROLLCALL_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a captured photo against enrolled identities
    Recognize {
        /// Captured photo. Sent to the encoder service when `encoder_url` is
        /// set, otherwise read from its JSON embedding sidecar
        image: PathBuf,
        /// Print the shortlist and diagnostics too
        #[arg(long)]
        verbose: bool,
    },
    /// Enroll an externally encoded embedding for an identity
    Enroll {
        /// Identity id (e.g. registration number)
        #[arg(long)]
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        faculty: Option<String>,
        #[arg(long)]
        level: Option<String>,
        /// Embedding JSON produced by the encoder service
        #[arg(long)]
        embedding: PathBuf,
        /// Encoder model version tag
        #[arg(long)]
        model_version: Option<String>,
    },
    /// List enrolled identities
    List,
    /// Remove an identity and its embeddings
    Remove {
        /// Identity id to remove
        id: String,
    },
    /// Print the effective configuration
    Config,
    /// Show store and matcher status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Config => {
            print!("{}", config.to_toml().context("rendering configuration")?);
            Ok(())
        }
        command => run(command, &config).await,
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    let engine = spawn_engine(config)
        .with_context(|| format!("opening identity store {}", config.db_path.display()))?;

    match command {
        Commands::Recognize { image, verbose } => {
            let outcome = match engine.recognize_image(&image).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    eprintln!("{}", user_message(&err));
                    return Err(err).context("recognition failed");
                }
            };

            if outcome.diagnostics.gallery_size_checked == 0 {
                eprintln!("No enrolled identities to match against");
            }
            let document = outcome.to_document();
            if verbose {
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                let summary = serde_json::json!({
                    "matched": document.matched,
                    "identity_id": document.identity_id,
                    "confidence": document.confidence,
                    "method": document.method,
                });
                println!("{summary}");
            }
        }
        Commands::Enroll {
            id,
            name,
            department,
            faculty,
            level,
            embedding,
            model_version,
        } => {
            let vector = PrecomputedEncoder
                .encode(&embedding)
                .with_context(|| format!("reading embedding {}", embedding.display()))?;
            let receipt = engine
                .enroll(EnrollmentRequest {
                    identity_id: id,
                    display_name: name,
                    labels: GroupLabels {
                        department,
                        faculty,
                        level,
                    },
                    embedding: vector,
                    model_version,
                })
                .await
                .context("enrollment failed")?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Commands::List => {
            let identities = engine.list().await?;
            if identities.is_empty() {
                println!("No identities enrolled");
            } else {
                println!("{}", serde_json::to_string_pretty(&identities)?);
            }
        }
        Commands::Remove { id } => {
            if engine.remove(&id).await? {
                println!("Removed {id}");
            } else {
                println!("No identity {id}");
            }
        }
        Commands::Status => {
            let status = engine.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Config => {}
    }

    Ok(())
}

/// Operator-facing wording for recognition failures.
fn user_message(err: &EngineError) -> String {
    match err {
        EngineError::Recognition(
            RecognitionError::InvalidProbe(_)
            | RecognitionError::Encoding(EncodingError::NoFaceDetected(_)),
        ) => "No usable face found. Capture a clearer photo and try again.".into(),
        EngineError::Recognition(e) if e.is_retryable() => {
            format!("Temporary failure, retry shortly: {e}")
        }
        other => other.to_string(),
    }
}
