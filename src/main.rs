use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use photoboxy::build::{BuildProgress, BuildState, BuildStats, Builder};
use photoboxy::config::Config;
use photoboxy::db::PhotoIndex;
use photoboxy::error::BuildError;
use photoboxy::logging;

#[derive(Default)]
struct Args {
    config_path: Option<PathBuf>,
    dest: Option<PathBuf>,
    html_only: bool,
    no_cluster: bool,
    source: Option<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("photoboxy {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                parsed.config_path = Some(path_arg(&args, i));
                i += 1;
            }
            "--dest" | "-d" => {
                parsed.dest = Some(path_arg(&args, i));
                i += 1;
            }
            "--html-only" => parsed.html_only = true,
            "--no-cluster" => parsed.no_cluster = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => {
                if parsed.source.is_some() {
                    eprintln!("Only one source directory may be given");
                    std::process::exit(1);
                }
                parsed.source = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    parsed
}

fn path_arg(args: &[String], i: usize) -> PathBuf {
    match args.get(i + 1) {
        Some(value) => PathBuf::from(value),
        None => {
            eprintln!("Error: {} requires a path argument", args[i]);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"photoboxy - incremental static photo album generator

USAGE:
    photoboxy [OPTIONS] [SOURCE]

OPTIONS:
    --config, -c PATH   Path to config file
    --dest, -d DIR      Output directory (overrides dest_dir)
    --html-only         Re-render every page without touching media
    --no-cluster        Skip face clustering
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTOBOXY_CONFIG    Path to config file (overrides default location)
    PHOTOBOXY_LOG       Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/photoboxy/config.toml"#
    );
}

fn print_stats(stats: &BuildStats) {
    println!("{:<10} {:>8} {:>8} {:>10}", "", "total", "changed", "generated");
    let rows = [
        ("folders", stats.total.folders, stats.changed.folders, stats.generated.folders),
        ("images", stats.total.images, stats.changed.images, stats.generated.images),
        ("videos", stats.total.videos, stats.changed.videos, stats.generated.videos),
        ("notes", stats.total.notes, stats.changed.notes, stats.generated.notes),
    ];
    for (kind, total, changed, generated) in rows {
        println!("{:<10} {:>8} {:>8} {:>10}", kind, total, changed, generated);
    }
    println!(
        "skipped: {}  failed jobs: {}  write failures: {}",
        stats.skipped, stats.jobs_failed, stats.write_failures
    );
    if let Some(report) = &stats.clustering {
        println!(
            "clustering: {} faces, {} clusters, {} new tags",
            report.samples,
            report.clusters_found,
            report.tags_created.len()
        );
    }
    println!(
        "enumerate {:.2?}  cluster {:.2?}  generate {:.2?}",
        stats.timings.enumerate, stats.timings.cluster, stats.timings.generate
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(source) = args.source {
        config.source_dir = source;
    }
    if let Some(dest) = args.dest {
        config.dest_dir = dest;
    }
    config.build.html_only |= args.html_only;
    if args.no_cluster {
        config.clustering.enabled = false;
    }

    config.validate()?;
    std::fs::create_dir_all(&config.dest_dir)
        .with_context(|| format!("Failed to create {}", config.dest_dir.display()))?;
    let index = PhotoIndex::open(&config.db_path())?;

    let (tx, rx) = mpsc::channel();
    let observer = thread::spawn(move || {
        for message in rx {
            match message {
                BuildProgress::StateChanged(state) => {
                    tracing::info!("Build {:?}", state);
                    if state == BuildState::Generated {
                        break;
                    }
                }
                BuildProgress::Visited { path, changed } => {
                    if changed {
                        tracing::debug!("Changed: {}", path.display());
                    }
                }
                BuildProgress::Clustered(report) => {
                    tracing::info!("Clustering created {} tags", report.tags_created.len());
                }
                BuildProgress::JobFailed { label, error } => {
                    tracing::warn!("{} failed: {}", label, error);
                }
            }
        }
    });

    let result = Builder::new(&config, &index).with_progress(tx).run();
    // The sender is dropped with the builder, so the observer always finishes
    let _ = observer.join();

    match result {
        Ok(stats) => print_stats(&stats),
        // Malformed manifests are configuration errors and end the run
        Err(e) if e.downcast_ref::<BuildError>().is_some() => return Err(e),
        Err(e) => tracing::error!("Build failed: {:#}", e),
    }
    Ok(())
}
