use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_core::rate_limiter::HttpRateLimiter;
use facegate_core::{create_provider, FaceRecognitionProvider, IndexOptions, ProviderConfig, QualityFilter};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facegate", about = "Index event photos and find them by face")]
struct Cli {
    /// Provider config (TOML). Without it, FACEGATE_* variables are used.
    #[arg(short, long, env = "FACEGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a face collection
    CreateCollection { collection_id: String },
    /// Delete a collection and all of its faces
    DeleteCollection { collection_id: String },
    /// Index the faces of one photo
    Index {
        collection_id: String,
        /// Photo file (JPEG or PNG)
        photo: PathBuf,
        /// Photo id stored with each face (default: the file stem)
        #[arg(long)]
        photo_id: Option<String>,
        #[arg(long, default_value_t = 100)]
        max_faces: usize,
        /// NONE, AUTO, LOW, MEDIUM or HIGH
        #[arg(long, default_value = "AUTO")]
        quality_filter: QualityFilter,
        /// Request age, gender and expression attributes
        #[arg(long)]
        attributes: bool,
    },
    /// Find photos containing the face in a query image
    Search {
        collection_id: String,
        /// Query image with the face to look for
        image: PathBuf,
        /// Minimum similarity in [0, 1]
        #[arg(long, default_value_t = 0.8)]
        min_similarity: f32,
        #[arg(long, default_value_t = 20)]
        max_results: usize,
    },
    /// Remove individual faces from a collection
    DeleteFaces {
        collection_id: String,
        #[arg(required = true)]
        face_ids: Vec<String>,
    },
    /// Show a rate-limit coordinator's ledger for one account
    LimiterStatus {
        /// Coordinator base URL
        #[arg(long, env = "FACEGATE_COORDINATOR_URL")]
        url: String,
        #[arg(long, env = "FACEGATE_ACCOUNT", default_value = "default")]
        account: String,
    },
}

fn load_config(path: Option<&Path>) -> Result<ProviderConfig> {
    match path {
        Some(path) => ProviderConfig::load(path).with_context(|| format!("failed to load {}", path.display())),
        None => ProviderConfig::from_env().context("invalid FACEGATE_* environment"),
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::LimiterStatus { url, account } = &cli.command {
        let limiter = HttpRateLimiter::new(url, account)?;
        let stats = limiter.stats().await?;
        return print_json(&serde_json::json!({
            "account": account,
            "interval_ms": stats.interval_ms,
            "pending_ms": stats.pending_ms,
            "throttle_events": stats.throttle_events,
            "throttle_penalty_ms": stats.throttle_penalty_ms,
        }));
    }

    let config = load_config(cli.config.as_deref())?;
    let provider = create_provider(&config).await?;
    tracing::debug!(provider = %provider.kind(), "provider ready");

    match cli.command {
        Commands::CreateCollection { collection_id } => {
            let id = provider.create_collection(&collection_id).await?;
            print_json(&serde_json::json!({ "collection_id": id }))?;
        }
        Commands::DeleteCollection { collection_id } => {
            provider.delete_collection(&collection_id).await?;
            print_json(&serde_json::json!({ "collection_id": collection_id, "deleted": true }))?;
        }
        Commands::Index {
            collection_id,
            photo,
            photo_id,
            max_faces,
            quality_filter,
            attributes,
        } => {
            let image = read_image(&photo)?;
            let photo_id = match photo_id {
                Some(id) => id,
                None => photo
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .context("cannot derive a photo id from the file name, pass --photo-id")?,
            };
            let options = IndexOptions {
                max_faces,
                quality_filter,
                detect_attributes: attributes,
            };
            let indexed = provider.index_photo(&collection_id, &photo_id, &image, &options).await?;
            print_json(&indexed)?;
        }
        Commands::Search {
            collection_id,
            image,
            min_similarity,
            max_results,
        } => {
            let image = read_image(&image)?;
            let found = provider
                .find_images_by_face(&collection_id, &image, min_similarity, max_results)
                .await?;
            print_json(&found)?;
        }
        Commands::DeleteFaces {
            collection_id,
            face_ids,
        } => {
            let deleted = provider.delete_faces(&collection_id, &face_ids).await?;
            print_json(&serde_json::json!({ "deleted_faces": deleted }))?;
        }
        Commands::LimiterStatus { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_index_arguments() {
        let cli = Cli::try_parse_from([
            "facegate",
            "index",
            "event-1",
            "photos/IMG_0001.jpg",
            "--quality-filter",
            "high",
            "--max-faces",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::Index {
                collection_id,
                photo_id,
                max_faces,
                quality_filter,
                attributes,
                ..
            } => {
                assert_eq!(collection_id, "event-1");
                assert_eq!(photo_id, None);
                assert_eq!(max_faces, 5);
                assert_eq!(quality_filter, QualityFilter::High);
                assert!(!attributes);
            }
            _ => panic!("expected index"),
        }
    }

    #[test]
    fn test_unknown_quality_filter_is_rejected() {
        assert!(Cli::try_parse_from(["facegate", "index", "e", "p.jpg", "--quality-filter", "extreme"]).is_err());
    }

    #[test]
    fn test_delete_faces_requires_ids() {
        assert!(Cli::try_parse_from(["facegate", "delete-faces", "event-1"]).is_err());
    }
}
