use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use serde_json::json;
use txt2img_stack_cli::adapters::assembly_store::DirectoryAssemblyStore;
use txt2img_stack_cli::adapters::inputs::{load_context, resolve_model_info, ModelInfoOverrides};
use txt2img_stack_cli::handlers::synth::{handle_synth, SynthRequest};
use txt2img_stack_core::contract::DEFAULT_STACK_NAME;
use txt2img_stack_core::logging::log_error;

#[derive(Parser)]
#[command(
    name = "txt2img-synth",
    about = "Synthesize the txt2img SageMaker stack into a CloudFormation cloud assembly"
)]
struct Cli {
    /// Stack name used for the template file and construct paths
    #[arg(long, default_value = DEFAULT_STACK_NAME)]
    stack_name: String,

    /// Output directory for the cloud assembly
    #[arg(short, long, default_value = "cdk.out")]
    output: PathBuf,

    /// JSON file with model_bucket_name, model_bucket_key, model_docker_image, instance_type, region_name
    #[arg(long)]
    model_info: Option<PathBuf>,

    /// Individual model info fields override the same field in --model-info
    #[arg(long)]
    model_bucket_name: Option<String>,

    #[arg(long)]
    model_bucket_key: Option<String>,

    #[arg(long)]
    model_docker_image: Option<String>,

    #[arg(long)]
    instance_type: Option<String>,

    #[arg(long)]
    region_name: Option<String>,

    /// cdk.json-style file whose "context" object seeds the deployment context
    #[arg(long)]
    context_file: Option<PathBuf>,

    /// Context entry as KEY=VALUE (repeatable), e.g. -c instance_count_param=2
    #[arg(short = 'c', long = "context")]
    context: Vec<String>,

    /// Also print the synthesis summary to stdout
    #[arg(long)]
    print_summary: bool,
}

fn fail(event: &str, message: String) -> ! {
    log_error("txt2img_synth", event, json!({ "error": message }));
    exit(1);
}

fn main() {
    let cli = Cli::parse();

    let overrides = ModelInfoOverrides {
        model_bucket_name: cli.model_bucket_name,
        model_bucket_key: cli.model_bucket_key,
        model_docker_image: cli.model_docker_image,
        instance_type: cli.instance_type,
        region_name: cli.region_name,
    };
    let model_info = resolve_model_info(cli.model_info.as_deref(), overrides)
        .unwrap_or_else(|message| fail("invalid_model_info", message));
    let context = load_context(cli.context_file.as_deref(), &cli.context)
        .unwrap_or_else(|message| fail("invalid_context", message));

    let request = SynthRequest {
        stack_name: cli.stack_name,
        model_info,
        context,
    };
    let store = DirectoryAssemblyStore::new(cli.output);
    // handle_synth logs its own failures
    let response = handle_synth(&request, &store).unwrap_or_else(|_| exit(1));

    if cli.print_summary {
        match serde_json::to_string_pretty(&response) {
            Ok(summary) => println!("{summary}"),
            Err(error) => fail("summary_failed", error.to_string()),
        }
    }
}
