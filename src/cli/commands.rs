//! CLI command definitions for superscaler.
//!
//! `run` scales and optimizes every image under the source folder; `scan`
//! only reports how each image would be processed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::discovery::{discover_images, pixel_count};
use crate::pipeline::{
    classify_all, plan, spawn_cancel_listener, CancelFlag, ClassifiedImage, InvocationSpec,
    Orchestrator, PipelineState, ProgressMonitor, ScalerConfig, SizeClass, StagePaths,
    Waifu2xLauncher,
};
use crate::scheduler::{OptimizerPool, OptimizerPoolConfig};
use crate::workspace;

/// Two-stage image upscaler and optimizer.
#[derive(Parser)]
#[command(name = "superscaler")]
#[command(about = "Upscale drawn images with waifu2x-caffe, then optimize them")]
#[command(version)]
#[command(
    long_about = "superscaler enhances every image under <base>/Source with waifu2x-caffe, writes the results to <base>/Destination mirroring the source tree, and optimizes each result in the background.\n\nType 'c' and Enter (or press Ctrl-C) during a run to stop after the current image.\n\nExample usage:\n  superscaler run --base-dir ./comic --denoise-level 2"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Scale and optimize all source images.
    Run(RunArgs),

    /// List source images with their size class and stage plan.
    Scan(ScanArgs),
}

/// Settings shared by every subcommand.
#[derive(Parser, Debug, Default)]
pub struct ConfigArgs {
    /// YAML configuration file. Environment variables and flags override it.
    #[arg(short, long, env = "SUPERSCALER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the source, temp and destination folders.
    #[arg(short, long)]
    pub base_dir: Option<PathBuf>,

    /// Source folder name under the base directory.
    #[arg(long)]
    pub source_folder: Option<String>,

    /// Temporary folder name under the base directory.
    #[arg(long)]
    pub temp_folder: Option<String>,

    /// Destination folder name under the base directory.
    #[arg(long)]
    pub destination_folder: Option<String>,
}

impl ConfigArgs {
    /// Defaults, then the config file, then `SUPERSCALER_*` variables, then flags.
    fn load(&self) -> anyhow::Result<ScalerConfig> {
        let mut config = match &self.config {
            Some(path) => ScalerConfig::from_yaml_file(path)?,
            None => ScalerConfig::default(),
        };
        config.apply_env()?;

        if let Some(dir) = &self.base_dir {
            config = config.with_base_dir(dir);
        }
        if let Some(name) = &self.source_folder {
            config = config.with_source_folder(name);
        }
        if let Some(name) = &self.temp_folder {
            config = config.with_temp_folder(name);
        }
        if let Some(name) = &self.destination_folder {
            config = config.with_destination_folder(name);
        }
        Ok(config)
    }
}

/// Arguments for `superscaler run`.
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Directory containing the waifu2x-caffe executable.
    #[arg(long)]
    pub tool_dir: Option<PathBuf>,

    /// Name of the waifu2x-caffe executable.
    #[arg(long)]
    pub tool_executable: Option<String>,

    /// Denoise level passed to waifu2x-caffe.
    #[arg(short = 'n', long)]
    pub denoise_level: Option<u32>,

    /// Optimizer executable (receives the file path via `{file}` in its arguments).
    #[arg(long)]
    pub optimizer: Option<String>,

    /// Maximum number of optimizer processes in flight.
    #[arg(short = 't', long)]
    pub optimizer_threads: Option<usize>,

    /// Do not listen for 'c' on stdin or Ctrl-C.
    #[arg(long)]
    pub no_cancel_listener: bool,

    /// Delete waifu2x error logs in the base directory when done.
    #[arg(long)]
    pub delete_error_logs: bool,

    /// Print the final report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

impl RunArgs {
    fn build_config(&self) -> anyhow::Result<ScalerConfig> {
        let mut config = self.config.load()?;

        if let Some(dir) = &self.tool_dir {
            config = config.with_tool_dir(dir);
        }
        if let Some(exe) = &self.tool_executable {
            config = config.with_tool_executable(exe);
        }
        if let Some(level) = self.denoise_level {
            config = config.with_denoise_level(level);
        }
        if let Some(exe) = &self.optimizer {
            config = config.with_optimizer(exe);
        }
        if let Some(threads) = self.optimizer_threads {
            config = config.with_optimizer_threads(threads);
        }
        if self.no_cancel_listener {
            config = config.with_cancel_listener(false);
        }
        if self.delete_error_logs {
            config = config.with_delete_error_logs(true);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Arguments for `superscaler scan`.
#[derive(Parser, Debug, Default)]
pub struct ScanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse CLI arguments without running the command.
///
/// Use this to access CLI args (like log_level) before running.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Scan(args) => run_scan_command(args).await,
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

fn stage_paths(config: &ScalerConfig) -> StagePaths {
    StagePaths::new(
        config.source_dir(),
        config.temp_dir(),
        config.destination_dir(),
    )
}

/// Lists and probes source images off the async runtime.
async fn load_images(source: PathBuf) -> anyhow::Result<Vec<ClassifiedImage>> {
    let images = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<ClassifiedImage>> {
        let found = discover_images(&source)?;
        Ok(classify_all(found, pixel_count))
    })
    .await??;

    let mut per_class: BTreeMap<SizeClass, usize> = BTreeMap::new();
    for image in &images {
        *per_class.entry(image.size_class()).or_default() += 1;
    }
    for (class, count) in &per_class {
        info!(class = %class, count = count, "Classified images");
    }

    Ok(images)
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.build_config()?;
    let paths = stage_paths(&config);

    info!(
        source = %paths.source_root().display(),
        destination = %paths.destination_root().display(),
        tool = %config.tool_path().display(),
        optimizer = %config.optimizer_executable,
        optimizer_threads = config.optimizer_threads,
        "Starting superscaler"
    );

    workspace::ensure_dir(paths.temp_root()).await;
    workspace::ensure_dir(paths.destination_root()).await;

    let images = load_images(paths.source_root().to_path_buf()).await?;
    if images.is_empty() {
        warn!(source = %paths.source_root().display(), "No images found");
    }

    let pool = Arc::new(OptimizerPool::new(OptimizerPoolConfig::from_scaler_config(
        &config,
        paths.clone(),
    )));
    pool.start()?;

    let cancel = CancelFlag::new();
    let listener = config
        .listen_for_cancel
        .then(|| spawn_cancel_listener(cancel.clone()));
    let state = PipelineState::with_cancel_flag(cancel.clone());
    let monitor = ProgressMonitor::start(
        state.clone(),
        Arc::clone(&pool),
        config.progress_interval(),
    );

    let mut launcher = Waifu2xLauncher::from_config(&config);
    if listener.is_some() {
        launcher = launcher.with_abort_flag(cancel);
    }

    let orchestrator = Orchestrator::new(launcher, Arc::clone(&pool), paths)
        .with_state(state)
        .with_poll_interval(config.poll_interval());

    let result = orchestrator.run(images).await;

    monitor.stop().await;
    if let Some(listener) = listener {
        listener.abort();
    }
    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "Optimizer pool did not shut down cleanly");
    }
    if config.delete_error_logs {
        workspace::delete_error_logs(&config.root_dir()).await;
    }

    // Fatal errors surface here, after cleanup, and exit non-zero.
    let report = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

// ============================================================================
// Scan Command Implementation
// ============================================================================

#[derive(Debug, Serialize)]
struct ScanEntry {
    path: PathBuf,
    pixels: u64,
    size_class: SizeClass,
    stages: Vec<InvocationSpec>,
}

impl From<&ClassifiedImage> for ScanEntry {
    fn from(image: &ClassifiedImage) -> Self {
        Self {
            path: image.path().to_path_buf(),
            pixels: image.pixel_count(),
            size_class: image.size_class(),
            stages: plan(image.size_class()).stages().to_vec(),
        }
    }
}

fn describe_stages(stages: &[InvocationSpec]) -> String {
    if stages.is_empty() {
        return "pass-through".to_string();
    }
    stages
        .iter()
        .map(|s| format!("(x{} b{} c{})", s.magnification, s.batch, s.split))
        .collect::<Vec<_>>()
        .join(" -> ")
}

async fn run_scan_command(args: ScanArgs) -> anyhow::Result<()> {
    let config = args.config.load()?;
    config.validate()?;
    let paths = stage_paths(&config);

    let images = load_images(paths.source_root().to_path_buf()).await?;
    let entries: Vec<ScanEntry> = images.iter().map(ScanEntry::from).collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let rel = paths.relative(&entry.path);
        println!(
            "{:<12} {:>12}  {}  {}",
            entry.size_class.display_name(),
            entry.pixels,
            describe_stages(&entry.stages),
            rel.display()
        );
    }
    println!("{} image(s)", entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        // Verify CLI definition is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["superscaler", "run"]).expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert!(args.config.base_dir.is_none());
                assert!(args.denoise_level.is_none());
                assert!(args.optimizer_threads.is_none());
                assert!(!args.no_cancel_listener);
                assert!(!args.delete_error_logs);
                assert!(!args.json);
            }
            _ => panic!("Expected Run command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_run_command_with_options() {
        let cli = Cli::try_parse_from([
            "superscaler",
            "run",
            "--base-dir",
            "/comics",
            "--source-folder",
            "In",
            "-n",
            "3",
            "-t",
            "2",
            "--optimizer",
            "pngcrush",
            "--no-cancel-listener",
            "--json",
            "--log-level",
            "debug",
        ])
        .expect("should parse");

        assert_eq!(cli.log_level, "debug");
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.config.base_dir, Some(PathBuf::from("/comics")));
        assert_eq!(args.config.source_folder.as_deref(), Some("In"));
        assert_eq!(args.denoise_level, Some(3));
        assert_eq!(args.optimizer_threads, Some(2));
        assert_eq!(args.optimizer.as_deref(), Some("pngcrush"));
        assert!(args.no_cancel_listener);
        assert!(args.json);
    }

    #[test]
    fn test_flags_override_config() {
        let args = RunArgs {
            denoise_level: Some(3),
            optimizer_threads: Some(5),
            no_cancel_listener: true,
            delete_error_logs: true,
            config: ConfigArgs {
                destination_folder: Some("Out".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = args.build_config().unwrap();
        assert_eq!(config.denoise_level, 3);
        assert_eq!(config.optimizer_threads, 5);
        assert_eq!(config.destination_folder, "Out");
        assert!(!config.listen_for_cancel);
        assert!(config.delete_error_logs);
    }

    #[test]
    fn test_invalid_flags_rejected() {
        let args = RunArgs {
            optimizer_threads: Some(0),
            ..Default::default()
        };
        assert!(args.build_config().is_err());
    }

    #[test]
    fn test_scan_command() {
        let cli = Cli::try_parse_from(["superscaler", "scan", "-b", "/comics", "--json"])
            .expect("should parse");

        match cli.command {
            Commands::Scan(args) => {
                assert!(args.json);
                assert_eq!(args.config.base_dir, Some(PathBuf::from("/comics")));
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_describe_stages() {
        assert_eq!(describe_stages(&[]), "pass-through");
        assert_eq!(
            describe_stages(plan(SizeClass::Small).stages()),
            "(x2 b4 c128) -> (x1 b4 c128)"
        );
    }
}
