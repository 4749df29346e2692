use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use atlasify_core::extract::extract_atlas;
use atlasify_core::{
    ImageService, MaxRectsHeuristic, MaxRectsPacker, MetadataStyle, OutputFormat, PipelineConfig,
    PipelineEvent, run_with,
};
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "atlasify",
    about = "Incrementally pack folders of sprites into texture atlases",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Show progress bars (disable with --progress false or --quiet)
    #[arg(long, default_value_t = true, action=ArgAction::Set, global=true, help_heading = "Logging/UX")]
    progress: bool,
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action=ArgAction::Count, global=true, help_heading = "Logging/UX")]
    verbose: u8,
    /// Quiet mode (overrides verbose)
    #[arg(
        short,
        long,
        default_value_t = false,
        global = true,
        help_heading = "Logging/UX"
    )]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build every atlas folder whose sprites changed
    Pack(PackArgs),
    /// Split an atlas back into its sprite files
    Extract(ExtractArgs),
}

#[derive(Parser, Debug, Clone)]
struct PackArgs {
    // Input/Output
    /// YAML or JSON pipeline config file; flags below override its values
    #[arg(short, long, help_heading = "Input/Output")]
    config: Option<PathBuf>,
    /// Folder whose subfolders are atlases
    #[arg(short, long, help_heading = "Input/Output")]
    input: Option<PathBuf>,
    /// Output directory (defaults to the input folder)
    #[arg(short, long, help_heading = "Input/Output")]
    output: Option<PathBuf>,
    /// Hash file (defaults to <input>/hash.json)
    #[arg(long, help_heading = "Input/Output")]
    hash_file: Option<PathBuf>,

    // Build
    /// Rebuild every atlas regardless of hashes
    #[arg(short, long, default_value_t = false, help_heading = "Build")]
    force: bool,
    /// Output scale; repeat for several (e.g. --scale 1 --scale 0.5)
    #[arg(long = "scale", help_heading = "Build")]
    scales: Vec<f64>,
    /// Atlas image format: png | jpeg | webp | avif
    #[arg(long, help_heading = "Build")]
    format: Option<String>,
    /// MaxRects heuristic: baf|bssf|blsf|bl|cp
    #[arg(long, default_value = "baf", help_heading = "Build")]
    heuristic: String,
    /// Preprocessing threads (0 = one per core)
    #[arg(long, help_heading = "Build")]
    workers: Option<usize>,

    // Export
    /// Append a short content hash to image file names
    #[arg(long, default_value_t = false, help_heading = "Export")]
    append_file_hash: bool,
    /// Name metadata files <atlas>.<ext>.json
    #[arg(long, default_value_t = false, help_heading = "Export")]
    append_texture_format: bool,
    /// Write metadata in the tab-indented legacy layout
    #[arg(long, default_value_t = false, help_heading = "Export")]
    legacy_json: bool,
    /// Print the merged configuration (after CLI/YAML) and exit
    #[arg(long, default_value_t = false, help_heading = "Export")]
    print_config: bool,
    /// Output format for --print-config: json|yaml
    #[arg(long, default_value = "json", value_parser = ["json", "yaml"], help_heading = "Export")]
    print_config_format: String,
}

#[derive(Parser, Debug, Clone)]
struct ExtractArgs {
    /// Atlas metadata document (e.g. hero.json)
    atlas: PathBuf,
    /// Output directory (defaults to a folder named after the atlas)
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_with_level(cli.quiet, cli.verbose);
    match &cli.command {
        Commands::Pack(args) => run_pack(args, cli.progress && !cli.quiet),
        Commands::Extract(args) => run_extract(args),
    }
}

/// Loads the config file (if any) and applies the command-line overrides.
fn build_config(cli: &PackArgs) -> anyhow::Result<PipelineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => {
            let file = fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_yaml::from_str::<PipelineConfig>(&file)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(v) = &cli.input {
        cfg.input_dir = v.clone();
    }
    if let Some(v) = &cli.output {
        cfg.output_dir = Some(v.clone());
    }
    if let Some(v) = &cli.hash_file {
        cfg.hash_file_path = Some(v.clone());
    }
    if cli.force {
        cfg.force = true;
    }
    if !cli.scales.is_empty() {
        cfg.scales = cli.scales.clone();
    }
    if let Some(f) = &cli.format {
        cfg.output_texture_format =
            OutputFormat::from_str(f).map_err(|_| anyhow!("unknown image format: {f}"))?;
    }
    if let Some(w) = cli.workers {
        cfg.workers = w;
    }
    if cli.append_file_hash {
        cfg.append_file_hash = true;
    }
    if cli.append_texture_format {
        cfg.append_texture_format = true;
    }
    if cli.legacy_json {
        cfg.metadata_style = MetadataStyle::Legacy;
    }
    Ok(cfg)
}

fn run_pack(cli: &PackArgs, show_progress: bool) -> anyhow::Result<()> {
    let cfg = build_config(cli)?;
    if cli.print_config {
        match cli.print_config_format.as_str() {
            "yaml" => println!("{}", serde_yaml::to_string(&cfg)?),
            _ => println!("{}", serde_json::to_string_pretty(&cfg)?),
        }
        return Ok(());
    }
    let heuristic = MaxRectsHeuristic::from_str(&cli.heuristic)
        .map_err(|_| anyhow!("unknown MaxRects heuristic: {}", cli.heuristic))?;
    let packer = MaxRectsPacker::new(heuristic);

    let bar = show_progress.then(|| {
        let b = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} atlas {pos}/{len} [{elapsed_precise}] {wide_msg}")
        {
            b.set_style(style);
        }
        b.enable_steady_tick(Duration::from_millis(100));
        b
    });

    let result = run_with(&cfg, &ImageService, &packer, |event| {
        if let Some(b) = &bar {
            render_event(b, event);
        }
    });
    if let Some(b) = &bar {
        b.finish_and_clear();
    }
    let summary = result.context("atlas build failed")?;
    info!(
        atlases = summary.atlases,
        built = summary.built,
        skipped = summary.skipped,
        removed = summary.removed,
        "done"
    );
    Ok(())
}

fn render_event(bar: &ProgressBar, event: &PipelineEvent) {
    match event {
        PipelineEvent::AtlasStarted { atlas, index, total } => {
            bar.set_length(*total as u64);
            bar.set_position(*index as u64);
            bar.set_message(atlas.clone());
        }
        PipelineEvent::AtlasSkipped { atlas, scale } => {
            bar.set_message(format!("{atlas} @{scale}x up to date"));
        }
        PipelineEvent::ScaleRemoved { atlas, scale } => {
            bar.set_message(format!("{atlas} @{scale}x removed (no sprites)"));
        }
        PipelineEvent::ScaleBuilt {
            atlas, scale, stats, ..
        } => {
            bar.set_message(format!(
                "{atlas} @{scale}x built ({:.1}% used)",
                stats.occupancy * 100.0
            ));
        }
        PipelineEvent::HashSaved { .. } => {}
        PipelineEvent::Finished(summary) => bar.set_position(summary.atlases as u64),
    }
}

fn run_extract(args: &ExtractArgs) -> anyhow::Result<()> {
    let out_dir = match &args.out_dir {
        Some(d) => d.clone(),
        None => {
            let stem = args
                .atlas
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow!("cannot derive a folder name from {}", args.atlas.display()))?;
            args.atlas.with_file_name(stem)
        }
    };
    fs::create_dir_all(&out_dir).with_context(|| format!("create out_dir {}", out_dir.display()))?;
    let written = extract_atlas(&args.atlas, &out_dir)
        .with_context(|| format!("extract {}", args.atlas.display()))?;
    info!(sprites = written.len(), out = %out_dir.display(), "extracted");
    Ok(())
}

fn init_tracing_with_level(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error".to_string()
    } else {
        match verbose {
            0 => "info".into(),
            1 => "debug".into(),
            _ => "trace".into(),
        }
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(false)
        .try_init();
}
