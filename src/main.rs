use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use unitypack_extract::{default_output_dir, extract};

#[derive(Parser, Debug)]
#[command(name = "extract", version)]
#[command(about = "Extract a .unitypackage into its original folder layout", long_about = None)]
struct Cli {
    /// The .unitypackage file to extract
    input_file: Option<PathBuf>,

    /// Destination directory, must not exist yet [default: ./<input name>]
    output_path: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();

    ExitCode::from(run(Cli::parse()))
}

fn run(cli: Cli) -> u8 {
    let Some(input) = cli.input_file else {
        println!("No input file specified.");
        return 0;
    };
    let output = cli
        .output_path
        .unwrap_or_else(|| default_output_dir(&input));

    match extract(&input, &output) {
        Ok(report) => {
            info!(
                "Extracted {} files from {} assets to {} ({} entries skipped)",
                report.files_written(),
                report.restored.len(),
                output.display(),
                report.skipped.len()
            );
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}
