use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use watermark_scrub::{
    default_output_path, DetectClient, DetectConfig, ProcessOptions, ProcessResult,
    WatermarkEngine,
};

#[derive(Parser)]
#[command(
    name = "watermark-scrub",
    about = "Find a watermark of unknown scale and polarity and paint it out",
    version,
    after_help = "Simple usage: watermark-scrub <image> -t <template>\n\n\
                  The template is a small image of the mark itself. Dark-on-light and\n\
                  light-on-dark renderings are both searched for."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: String,

    /// Output file or directory (default: {name}_cleaned.{ext})
    #[arg(short, long)]
    output: Option<String>,

    /// Template image of the watermark
    #[arg(short, long)]
    template: PathBuf,

    /// JSON detection config; missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Downscale images wider than this before searching
    #[arg(long)]
    max_width: Option<u32>,

    /// Acceptance threshold override (0.0-1.0)
    #[arg(long)]
    accept: Option<f32>,

    /// Detect and report only, never write output
    #[arg(long)]
    dry_run: bool,

    /// Print one JSON result per line on stdout
    #[arg(long)]
    json: bool,

    /// Run detection on a background worker with this timeout (single file only)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut config = match &cli.config {
        Some(path) => match DetectConfig::from_json_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: Failed to read config {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => DetectConfig::default(),
    };

    if let Some(width) = cli.max_width {
        if width == 0 {
            eprintln!("Error: --max-width must be at least 1");
            process::exit(1);
        }
        config.max_working_width = width;
    }

    if let Some(accept) = cli.accept {
        if !(0.0..=1.0).contains(&accept) {
            eprintln!("Error: Threshold must be between 0.0 and 1.0");
            process::exit(1);
        }
        config.search.accept_above = accept;
    }

    let opts = ProcessOptions {
        config,
        dry_run: cli.dry_run,
    };

    let engine = match WatermarkEngine::from_template_path(&cli.template) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };

    let input_path = Path::new(&cli.input);
    if !input_path.exists() {
        eprintln!("Error: Input path does not exist: {}", cli.input);
        process::exit(1);
    }

    if !cli.quiet && !cli.json {
        eprintln!(
            "Searching for {}x{} template (accept above {:.0}%)",
            engine.template().width(),
            engine.template().height(),
            opts.config.search.accept_above * 100.0
        );
        if opts.dry_run {
            eprintln!("Dry run: nothing will be written");
        }
        eprintln!();
    }

    let results = if input_path.is_dir() {
        if cli.timeout_ms.is_some() {
            eprintln!("Error: --timeout-ms applies to single files only");
            process::exit(1);
        }
        let output_dir = if let Some(o) = &cli.output {
            PathBuf::from(o)
        } else if opts.dry_run {
            input_path.to_path_buf()
        } else {
            eprintln!("Error: Output directory is required for batch processing");
            eprintln!("Usage: watermark-scrub <input_dir> -t <template> -o <output_dir>");
            process::exit(1);
        };
        engine.process_directory(input_path, &output_dir, &opts)
    } else {
        let output_path = match &cli.output {
            Some(o) => PathBuf::from(o),
            None => default_output_path(input_path),
        };
        vec![process_single(&engine, input_path, &output_path, &opts, cli.timeout_ms)]
    };

    let mut success_count = 0u32;
    let mut skip_count = 0u32;
    let mut fail_count = 0u32;

    for r in &results {
        if cli.json {
            match serde_json::to_string(r) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("[FAIL] {}: {e}", r.path.display()),
            }
        } else {
            print_result(r, cli.verbose, cli.quiet);
        }
        if r.skipped {
            skip_count += 1;
        } else if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 && !cli.quiet && !cli.json {
        eprintln!();
        eprint!("[Summary] Processed: {success_count}");
        if skip_count > 0 {
            eprint!(", Skipped: {skip_count}");
        }
        if fail_count > 0 {
            eprint!(", Failed: {fail_count}");
        }
        eprintln!(" (Total: {})", results.len());
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn process_single(
    engine: &WatermarkEngine,
    input: &Path,
    output: &Path,
    opts: &ProcessOptions,
    timeout_ms: Option<u64>,
) -> ProcessResult {
    let Some(ms) = timeout_ms else {
        return engine.process_file(input, output, opts);
    };

    let mut client = match DetectClient::spawn(opts.config.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Fatal: Failed to start detection worker: {e}");
            process::exit(1);
        }
    };
    let id = input.display().to_string();
    engine.process_file_with(input, output, opts, |image| {
        client.detect_image(
            id,
            image,
            engine.template(),
            &opts.config,
            Duration::from_millis(ms),
        )
    })
}

fn print_result(result: &ProcessResult, verbose: bool, quiet: bool) {
    if quiet && result.success {
        return;
    }

    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if result.skipped {
        if !quiet {
            eprintln!("[SKIP] {filename}: {}", result.message);
        }
    } else if result.success {
        if !quiet {
            eprintln!("[OK] {filename} ({:.0}% match)", result.score * 100.0);
        }
    } else {
        eprintln!("[FAIL] {filename}: {}", result.message);
    }

    if verbose && !result.message.is_empty() {
        if let Some(region) = &result.region {
            eprintln!(
                "  -> {}x{} at ({}, {})",
                region.w, region.h, region.x, region.y
            );
        }
        eprintln!("  -> {}", result.message);
    }
}
