//! TilePutty CLI - upload a local tile cache to S3.
//!
//! ```text
//! tileputty --dataset forest --version v2 --update-latest /data/tiles/forest
//! ```

mod error;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tileputty::coordinates::{DEFAULT_BUCKET, DEFAULT_IMPLEMENTATION};
use tileputty::storage::{ObjectStore, S3Store};
use tileputty::{
    ConfigFile, KeyStyle, PublishCoordinates, StorageConfig, TilePublisher, UploadConfig,
};

use crate::error::CliError;

/// Upload a local tile cache to AWS S3.
#[derive(Debug, Parser)]
#[command(name = "tileputty", disable_version_flag = true)]
struct Args {
    /// Path to the local tile cache
    #[arg(value_name = "TILE_CACHE")]
    tile_cache: PathBuf,

    /// Dataset name
    #[arg(long, visible_alias = "layer")]
    dataset: String,

    /// Dataset version
    #[arg(long)]
    version: String,

    /// Destination bucket [default: gfw-tiles]
    #[arg(long)]
    bucket: Option<String>,

    /// Implementation (rendering option) name
    #[arg(long, visible_alias = "option", default_value = DEFAULT_IMPLEMENTATION)]
    implementation: String,

    /// Number of upload workers [default: one per CPU]
    #[arg(long)]
    workers: Option<usize>,

    /// S3-compatible endpoint URL
    #[arg(long)]
    endpoint_url: Option<String>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Record the version in the bucket's `latest` manifest
    #[arg(long, alias = "update_latest")]
    update_latest: bool,

    /// Publish tiles without their file extension ({z}/{x}/{y})
    #[arg(long)]
    strip_tile_extensions: bool,

    /// Exit with an error if any file fails to upload
    #[arg(long)]
    fail_on_upload_error: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Everything a run needs, after layering flags over file and environment.
#[derive(Debug)]
struct Settings {
    coordinates: PublishCoordinates,
    storage: StorageConfig,
    upload: UploadConfig,
}

impl Settings {
    /// Apply command-line flags over the loaded config.
    fn resolve(args: &Args, file: ConfigFile) -> Result<Self, CliError> {
        let bucket = args
            .bucket
            .clone()
            .or(file.bucket.clone())
            .unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let coordinates =
            PublishCoordinates::new(bucket, &args.dataset, &args.version, &args.implementation)?;

        let mut storage = file.storage.clone();
        if let Some(url) = &args.endpoint_url {
            storage = storage.with_endpoint_url(url);
        }
        if let Some(region) = &args.region {
            storage = storage.with_region(region);
        }

        let mut upload = file.upload_config();
        if let Some(workers) = args.workers {
            if workers == 0 {
                return Err(CliError::Config(
                    "--workers must be at least 1".to_string(),
                ));
            }
            upload = upload.with_workers(workers);
        }
        if args.strip_tile_extensions {
            upload = upload.with_key_style(KeyStyle::StripTileExtension);
        }

        Ok(Self {
            coordinates,
            storage,
            upload,
        })
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let file = ConfigFile::load()?.apply_env()?;
    let settings = Settings::resolve(&args, file)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(publish(args, settings))
}

async fn publish(args: Args, settings: Settings) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing uploads in flight");
            signal_cancel.cancel();
        }
    });

    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::connect(&settings.storage).await);
    let report = TilePublisher::new(store, settings.coordinates, settings.upload)
        .with_update_latest(args.update_latest)
        .publish(&args.tile_cache, cancel)
        .await?;

    info!("{}", report);

    if report.cancelled {
        return Err(CliError::Cancelled);
    }
    if args.fail_on_upload_error && report.has_failures() {
        return Err(CliError::UploadFailures {
            failed: report.failures.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["tileputty", "--dataset", "forest", "--version", "v1"];
        argv.extend_from_slice(extra);
        argv.push("/data/tiles");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        let settings = Settings::resolve(&args, ConfigFile::default()).unwrap();

        assert_eq!(settings.coordinates.bucket(), "gfw-tiles");
        assert_eq!(settings.coordinates.implementation(), "default");
        assert_eq!(settings.upload.key_style, KeyStyle::Preserve);
        assert_eq!(settings.storage, StorageConfig::default());
        assert!(!args.update_latest);
    }

    #[test]
    fn test_legacy_flag_names_accepted() {
        let args = Args::try_parse_from([
            "tileputty",
            "--layer",
            "roads",
            "--version",
            "v3",
            "--option",
            "dark",
            "--update_latest",
            "/data/tiles",
        ])
        .unwrap();

        assert_eq!(args.dataset, "roads");
        assert_eq!(args.implementation, "dark");
        assert!(args.update_latest);
    }

    #[test]
    fn test_flags_override_config_file() {
        let file = ConfigFile::parse(
            "[storage]\nbucket = from-file\nregion = eu-west-1\n[upload]\nworkers = 3\n",
        )
        .unwrap();
        let args = parse(&[
            "--bucket",
            "from-flag",
            "--workers",
            "7",
            "--endpoint-url",
            "http://localhost:9000",
        ]);

        let settings = Settings::resolve(&args, file).unwrap();

        assert_eq!(settings.coordinates.bucket(), "from-flag");
        assert_eq!(settings.upload.workers, 7);
        assert_eq!(settings.storage.region.as_deref(), Some("eu-west-1"));
        assert_eq!(
            settings.storage.endpoint_url.as_deref(),
            Some("http://localhost:9000")
        );
        assert!(settings.storage.force_path_style);
    }

    #[test]
    fn test_config_file_bucket_used_without_flag() {
        let file = ConfigFile::parse("[storage]\nbucket = from-file\n").unwrap();
        let settings = Settings::resolve(&parse(&[]), file).unwrap();
        assert_eq!(settings.coordinates.bucket(), "from-file");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let args = parse(&["--workers", "0"]);
        let err = Settings::resolve(&args, ConfigFile::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_invalid_dataset_rejected() {
        let args = Args::try_parse_from([
            "tileputty",
            "--dataset",
            "a/b",
            "--version",
            "v1",
            "/data/tiles",
        ])
        .unwrap();
        let err = Settings::resolve(&args, ConfigFile::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_strip_tile_extensions_flag() {
        let args = parse(&["--strip-tile-extensions"]);
        let settings = Settings::resolve(&args, ConfigFile::default()).unwrap();
        assert_eq!(settings.upload.key_style, KeyStyle::StripTileExtension);
    }

    #[test]
    fn test_missing_required_args() {
        assert!(Args::try_parse_from(["tileputty", "/data/tiles"]).is_err());
    }
}
