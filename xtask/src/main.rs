use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the txt2img stack workspace",
    long_about = "A unified CLI for synthesizing the txt2img SageMaker stack,\n\
                  packaging the cloud assembly, and running CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the stack into a cloud assembly (args are passed to txt2img-synth)
    Synth {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Zip a synthesized cloud assembly for handing to a deployment pipeline
    PackageAssembly {
        /// Cloud assembly directory
        #[arg(long, default_value = "cdk.out")]
        assembly_dir: String,
        /// Output zip path
        #[arg(long, default_value = "dist/cloud-assembly.zip")]
        output: String,
    },
    /// Run CI checks (fmt, clippy, tests, sample synth)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Synthesize a sample stack
    Synth,
    /// Run check + synth
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_synth(extra: &[&str]) {
    let mut args = vec!["run", "-p", "txt2img_stack_cli", "--bin", "txt2img-synth", "--"];
    args.extend_from_slice(extra);
    run_cargo(&args);
}

fn package_assembly(assembly_dir: &Path, zip_path: &Path) {
    if !assembly_dir.is_dir() {
        panic!(
            "expected a cloud assembly at '{}'; run `cargo run -p xtask -- synth` first",
            assembly_dir.display()
        );
    }

    let mut entries: Vec<_> = fs::read_dir(assembly_dir)
        .expect("failed to list cloud assembly directory")
        .map(|entry| entry.expect("failed to read cloud assembly entry").path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent).expect("failed to create package directory");
    }
    let file = fs::File::create(zip_path).expect("failed to create assembly zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for path in &entries {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .expect("assembly file names must be UTF-8");
        let body = fs::read(path).expect("failed to read assembly file");
        zip.start_file(name, options)
            .expect("failed to start assembly zip entry");
        zip.write_all(&body).expect("failed to write assembly zip entry");
    }
    zip.finish().expect("failed to finish assembly zip");

    eprintln!(
        "\nPackaged {} file(s):\n- {}",
        entries.len(),
        zip_path.display()
    );
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test txt2img_stack_core");
    run_cargo(&["test", "-p", "txt2img_stack_core"]);

    step("Test txt2img_stack_cli");
    run_cargo(&["test", "-p", "txt2img_stack_cli"]);
}

fn ci_synth() {
    step("Synthesize sample stack");
    run_synth(&[
        "--output",
        "target/ci-cdk.out",
        "--model-bucket-name",
        "sample-bucket",
        "--model-bucket-key",
        "sample/model.tar.gz",
        "--model-docker-image",
        "sample-image:latest",
        "--instance-type",
        "ml.g4dn.4xlarge",
        "--region-name",
        "us-east-1",
        "-c",
        "instance_count_param=2",
    ]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Synth { args } => {
            let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
            run_synth(&borrowed);
        }
        Commands::PackageAssembly {
            assembly_dir,
            output,
        } => {
            step("Package cloud assembly");
            package_assembly(Path::new(&assembly_dir), Path::new(&output));
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Synth => ci_synth(),
                CiJob::All => {
                    ci_check();
                    ci_synth();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
