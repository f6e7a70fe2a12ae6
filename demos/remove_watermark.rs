//! Remove a watermark from a single image.
//!
//! Usage:
//! ```sh
//! cargo run --example remove_watermark -- template.png input.jpg output.jpg
//! ```

use std::env;
use std::path::Path;
use std::process;

use watermark_scrub::{ProcessOptions, WatermarkEngine};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <template> <input> <output>", args[0]);
        process::exit(1);
    }

    let engine = WatermarkEngine::from_template_path(Path::new(&args[1]))
        .expect("failed to load template");
    let opts = ProcessOptions::default();
    let result = engine.process_file(args[2].as_ref(), args[3].as_ref(), &opts);

    if result.skipped {
        println!("Skipped: {}", result.message);
    } else if result.success {
        println!("Done: {}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        process::exit(1);
    }
}
