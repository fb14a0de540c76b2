use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use log::warn;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use grounding_dataset::{Case, ResultRecord};
use grounding_preprocess::{encode_for_upload, PreprocessError};
use grounding_report::{aggregate, ResultSink};
use grounding_score::{grade, parse_coordinates};

// ================ INFERENCE CONTRACT ================== //

const SYSTEM_PROMPT: &str = r#"You are a GUI grounding agent. 
## Task
Given a screenshot and the user's grounding instruction. Your task is to accurately locate a UI element based on the user's instructions.
First, you should carefully examine the screenshot and analyze the user's instructions,  translate the user's instruction into a effective reasoning process, and then provide the final coordinate.
## Output Format
Return a json object with a reasoning process in <grounding_think></grounding_think> tags, a [x,y] format coordinate within <answer></answer> XML tags:
<grounding_think>...</grounding_think>
<answer>
{"coordinate": [x,y]}
</answer>
## Input instruction
"#;

const TEMPERATURE: f64 = 0.0;
const MAX_TOKENS: u32 = 256;

/// 0) Parse CLI arguments
#[derive(Parser, Debug)]
#[command(about = "Evaluate GUI grounding datasets against a VLM server.")]
struct Args {
    /// Directory containing JSON dataset files
    #[arg(long)]
    dataset_dir: PathBuf,

    /// Root directory for images
    #[arg(long)]
    image_root: PathBuf,

    /// Path of the JSONL output file (truncated at start)
    #[arg(long, default_value = "./results.jsonl")]
    output_file: PathBuf,

    /// Inference server IP address
    #[arg(long, default_value = "localhost")]
    server_ip: String,

    /// Inference server port
    #[arg(long, default_value = "8001")]
    server_port: u16,

    /// Model name served by the endpoint
    #[arg(long, default_value = "MAI-UI-8B")]
    model_name: String,

    /// API key for the endpoint
    #[arg(long, default_value = "EMPTY")]
    api_key: String,

    /// Number of concurrent workers
    #[arg(long, default_value = "16")]
    num_workers: usize,
}

/// 1) One chat-completion request per case against an OpenAI-compatible
///    endpoint. Temperature is pinned to 0.0 for determinism; no retries.
struct InferenceClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl InferenceClient {
    fn new(base_url: &str, model: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{base_url}/chat/completions"),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn complete(&self, instruction: &str, base64_png: &str) -> Result<String> {
        let body = chat_request(&self.model, instruction, base64_png);
        let response: serde_json::Value = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("response missing choices[0].message.content"))
    }
}

fn chat_request(model: &str, instruction: &str, base64_png: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [
            {
                "role": "system",
                "content": [
                    { "type": "text", "text": SYSTEM_PROMPT }
                ]
            },
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": format!("{instruction}\n") },
                    { "type": "image_url", "image_url": { "url": format!("data:image/png;base64,{base64_png}") } }
                ]
            }
        ],
        "temperature": TEMPERATURE,
        "max_tokens": MAX_TOKENS
    })
}

// ================ CASE PROCESSING ================== //

/// 2) Run one case end to end: encode image, call the model, parse, grade,
///    append one row. A missing image drops the case with a warning and no
///    row; any other error propagates to the worker loop, which logs it and
///    moves on. Either way nothing crosses the case boundary.
fn process_case(
    case: &Case,
    image_root: &Path,
    client: &InferenceClient,
    sink: &ResultSink,
) -> Result<()> {
    let image_path = image_root.join(&case.img_filename);
    let encoded = match encode_for_upload(&image_path) {
        Ok(encoded) => encoded,
        Err(PreprocessError::ImageMissing(path)) => {
            warn!("Image not found: {path}");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let raw_response = client.complete(&case.instruction, &encoded.base64_png)?;
    let parsed = parse_coordinates(&raw_response);
    let graded = grade(
        parsed,
        &case.bbox,
        case.img_size.as_deref(),
        encoded.width,
        encoded.height,
    );

    let record = ResultRecord {
        case: case.clone(),
        raw_response,
        pred: graded.pred,
        pred_norm: graded.pred_norm,
        correctness: graded.correctness,
    };
    sink.append(&record)?;
    Ok(())
}

// ================ HARNESS ================== //

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let base_url = format!("http://{}:{}/v1", args.server_ip, args.server_port);

    // 3) Create the sink first so a rerun never aggregates stale rows
    let sink = ResultSink::create(&args.output_file)?;

    // 4) Fatal before dispatch: missing directory or zero dataset files
    let files = grounding_dataset::dataset_files(&args.dataset_dir)?;

    println!("Connecting to VLLM server: {base_url}");
    println!("Using model: {}", args.model_name);
    println!("Image Root: {}", args.image_root.display());
    println!("Dataset Directory: {}", args.dataset_dir.display());
    println!("Output File: {}", args.output_file.display());
    println!("Found {} dataset files.", files.len());
    println!("Concurrent workers: {}", args.num_workers);
    println!("{}", "-".repeat(60));

    // 5) Flatten every case from every file into one task list
    let mut tasks: Vec<Case> = Vec::new();
    for path in &files {
        let cases = grounding_dataset::load_file(path)?;
        println!(
            "Loaded {} samples from {}",
            cases.len(),
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        tasks.extend(cases);
    }
    println!("Total tasks across all files: {}", tasks.len());
    println!("Start processing...");

    let client = Arc::new(InferenceClient::new(
        &base_url,
        &args.model_name,
        &args.api_key,
    )?);

    // 6) Submit the whole batch eagerly, then drain it with a fixed pool.
    //    Each worker owns its decoded image and network call; the sink is the
    //    only shared state.
    let (tx, rx) = unbounded::<Case>();
    for case in tasks {
        tx.send(case).map_err(|_| anyhow!("task channel closed"))?;
    }
    drop(tx);

    let mut handles = Vec::with_capacity(args.num_workers);
    for _ in 0..args.num_workers {
        let rx = rx.clone();
        let client = Arc::clone(&client);
        let sink = sink.clone();
        let image_root = args.image_root.clone();
        handles.push(thread::spawn(move || {
            while let Ok(case) = rx.recv() {
                if let Err(err) = process_case(&case, &image_root, &client, &sink) {
                    warn!("Error processing case {}: {err:#}", case.img_filename);
                }
            }
        }));
    }
    drop(rx);

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))?;
    }

    // 7) Second pass over the sink for the accuracy report
    println!();
    println!("Processing complete. Calculating aggregated accuracy...");
    let summary = aggregate(&args.output_file)?;
    print!("{}", summary.render());

    Ok(())
}
