use std::backtrace::Backtrace;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{error, info, LevelFilter};

use scene_forge::{ArchiveMode, BuildConfig, SceneAssembler};

/// Assemble scene elements from descriptor JSON and raw meshes.
#[derive(Parser, Debug)]
#[command(name = "scene-forge", version, about)]
struct Args {
    /// Root of the scene tree; descriptor paths are relative to it.
    #[arg(long, value_name = "DIR")]
    scene_root: Option<PathBuf>,

    /// Where converted meshes and element artifacts are written.
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// JSON build configuration; flags override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Elements built in parallel.
    #[arg(long, short = 'j', value_name = "N")]
    jobs: Option<usize>,

    /// Reconvert meshes even when a converted artifact exists.
    #[arg(long)]
    overwrite_converted: bool,

    /// Rebuild elements even when their artifact exists.
    #[arg(long)]
    overwrite_elements: bool,

    /// Duplicate archive geometry per instance instead of referencing it.
    #[arg(long)]
    copy_archives: bool,

    /// Debug logging.
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Elements to build; all discovered elements when empty.
    #[arg(value_name = "ELEMENT")]
    elements: Vec<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    setup_diagnostics(args.verbose);

    let config = build_config(&args)?;
    info!("Building scene at {}", config.scene_root.display());

    let scene = SceneAssembler::new(config);
    let report = if args.elements.is_empty() {
        scene.build_all()
    } else {
        scene.build_named(&args.elements)
    }
    .context("scene build aborted")?;

    println!(
        "written: {}  skipped: {}  failed: {}",
        report.written.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (name, reason) in &report.failed {
        println!("  {name}: {reason}");
    }
    if report.cancelled {
        println!("build cancelled");
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn build_config(args: &Args) -> anyhow::Result<BuildConfig> {
    let mut config = match &args.config {
        Some(path) => BuildConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => BuildConfig::default(),
    };
    if let Some(root) = &args.scene_root {
        config = config.with_scene_root(root);
    }
    if let Some(dir) = &args.cache_dir {
        config = config.with_cache_dir(dir);
    }
    if let Some(jobs) = args.jobs {
        config = config.with_jobs(jobs);
    }
    if args.overwrite_converted {
        config = config.with_overwrite_converted(true);
    }
    if args.overwrite_elements {
        config = config.with_overwrite_element(true);
    }
    if args.copy_archives {
        config = config.with_archive_mode(ArchiveMode::Copy);
    }
    Ok(config)
}

/// Logger plus a panic hook that prints the location and a backtrace.
fn setup_diagnostics(verbose: bool) {
    env_logger::Builder::new()
        .filter_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::force_capture();

        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };

        let location = panic_info
            .location()
            .map_or("Unknown location".to_string(), |loc| {
                format!("{}:{}", loc.file(), loc.line())
            });

        error!("panic at {location}: {msg}\n{backtrace}");
    }));
}
