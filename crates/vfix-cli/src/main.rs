//! vfix CLI - Visual validation for generated HTML
//!
//! Usage:
//!   vfix validate <file>                     Click-test every interactive element
//!   vfix validate <file> --js-only           Only render and collect JS errors
//!   vfix diff <before> <after> --box x,y,w,h Diff two screenshots around an element
//!   vfix config init                         Write .vfix/config.toml with defaults
//!   vfix config show                         Print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vfix_browser::screenshot::write_diff_artifact;
use vfix_browser::{PageValidator, Sandbox, ValidationResult};
use vfix_core::fail_open::fail_open_sync;
use vfix_core::{BoundingBox, VfixConfig};
use vfix_diff::{DiffEngine, DiffScale, ResultClassifier};

#[derive(Parser)]
#[command(name = "vfix")]
#[command(author, version, about = "Visual validation and repair for generated HTML", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root holding .vfix/config.toml
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a page and click-test its interactive elements
    Validate {
        /// HTML file to validate
        file: PathBuf,

        /// Skip click testing; only report whether the page renders cleanly
        #[arg(long)]
        js_only: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Write per-element diff images to this directory
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Compare two screenshots at tight, local and global scale
    Diff {
        /// Screenshot taken before the interaction
        before: PathBuf,

        /// Screenshot taken after the interaction
        after: PathBuf,

        /// Element bounding box as x,y,width,height
        #[arg(long = "box", value_parser = parse_box)]
        element_box: BoundingBox,

        /// Write diff visualisations to this directory
        #[arg(long)]
        diff_out: Option<PathBuf>,

        /// Print the diff and verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init,
    /// Print the configuration in effect
    Show,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Validate {
            file,
            js_only,
            json,
            artifacts,
        } => cmd_validate(&cli.root, &file, js_only, json, artifacts).await,
        Commands::Diff {
            before,
            after,
            element_box,
            diff_out,
            json,
        } => cmd_diff(&cli.root, &before, &after, &element_box, diff_out.as_deref(), json),
        Commands::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&cli.root),
            ConfigAction::Show => cmd_config_show(&cli.root),
        },
    }
}

fn load_config(root: &Path) -> Result<VfixConfig> {
    VfixConfig::load_or_default(root)
        .with_context(|| format!("Failed to load config under {}", root.display()))
}

async fn cmd_validate(
    root: &Path,
    file: &Path,
    js_only: bool,
    json: bool,
    artifacts: Option<PathBuf>,
) -> Result<ExitCode> {
    let mut config = load_config(root)?;
    if artifacts.is_some() {
        config.sandbox.artifact_dir = artifacts;
    }

    let html = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    info!("Validating {}", file.display());
    let sandbox = Sandbox::from_config(&config);
    let result = sandbox.validate(&html, js_only).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.report())?);
    } else {
        print_validation(&result);
    }

    Ok(if result.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_validation(result: &ValidationResult) {
    if !result.rendered {
        println!("Page did not render");
        for error in &result.js_errors {
            println!("  {}", error);
        }
        return;
    }

    println!(
        "Elements: {} found, {} responsive ({:.0}%)",
        result.total(),
        result.responsive_count(),
        result.success_rate() * 100.0
    );
    for failure in result.failures() {
        print!("  [{}] {}", failure.status, failure.selector);
        if let Some(blocker) = &failure.blocking_element {
            print!(" (blocked by {})", blocker);
        }
        println!();
    }

    if !result.js_errors.is_empty() {
        println!("JS errors:");
        for error in &result.js_errors {
            println!("  {}", error);
        }
    }
    if !result.console_errors.is_empty() {
        println!("Console errors:");
        for error in &result.console_errors {
            println!("  {}", error);
        }
    }

    println!(
        "Score: {:.2}  {}  ({} ms)",
        result.score(),
        if result.passed() { "PASSED" } else { "FAILED" },
        result.duration_ms
    );
}

fn cmd_diff(
    root: &Path,
    before: &Path,
    after: &Path,
    element_box: &BoundingBox,
    diff_out: Option<&Path>,
    json: bool,
) -> Result<ExitCode> {
    let config = load_config(root)?;
    let before_png =
        std::fs::read(before).with_context(|| format!("Failed to read {}", before.display()))?;
    let after_png =
        std::fs::read(after).with_context(|| format!("Failed to read {}", after.display()))?;

    let engine = DiffEngine::new(config.diff.clone());
    let classifier = ResultClassifier::new(config.classifier.clone());

    let diff = engine
        .compare(&before_png, &after_png, element_box, diff_out.is_some())
        .context("Failed to diff screenshots")?;
    let verdict = classifier.classify(&diff, None);

    if let Some(dir) = diff_out {
        for (index, scale) in [DiffScale::Tight, DiffScale::Local, DiffScale::Global]
            .into_iter()
            .enumerate()
        {
            if let Some(png) = diff.region(scale).diff_image.as_deref() {
                if let Some(path) = fail_open_sync("write diff image", || {
                    write_diff_artifact(dir, index, &scale.to_string(), "diff", png)
                }) {
                    info!("Wrote {}", path.display());
                }
            }
        }
    }

    if json {
        let output = serde_json::json!({
            "diff": diff,
            "classification": verdict,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for scale in [DiffScale::Tight, DiffScale::Local, DiffScale::Global] {
            let region = diff.region(scale);
            println!(
                "{:<7} {:>8.4}  ({} / {} px)",
                scale.to_string(),
                region.diff_ratio,
                region.diff_count,
                region.total_pixels
            );
        }
        println!(
            "{} (confidence {:.2}): {}",
            verdict.classification, verdict.confidence, verdict.reasoning
        );
    }

    Ok(if verdict.classification.is_passing() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cmd_config_init(root: &Path) -> Result<ExitCode> {
    let path = VfixConfig::write_default(root).context("Failed to write default config")?;
    println!("Wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_config_show(root: &Path) -> Result<ExitCode> {
    let config = load_config(root)?;
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}

/// Parse `x,y,width,height`
fn parse_box(s: &str) -> Result<BoundingBox, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid number in '{}': {}", s, e))?;

    match parts.as_slice() {
        [x, y, width, height] if *width >= 0.0 && *height >= 0.0 => {
            Ok(BoundingBox::new(*x, *y, *width, *height))
        }
        [_, _, _, _] => Err("width and height must not be negative".to_string()),
        _ => Err(format!("expected x,y,width,height but got '{}'", s)),
    }
}
