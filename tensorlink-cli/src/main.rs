//! tensorlink CLI entrypoint.
//!
//! ```bash
//! tlink bench --frames 300 --batch-size 4 --buffer-threshold 2 --json
//! tlink graph --input prompt.json --output streaming.json
//! tlink graph --input prompt.json --check
//! ```

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use tensorlink_core::config::BufferConfig;
use tensorlink_core::error::{LinkError, Result};
use tensorlink_core::graph::PromptGraph;
use tensorlink_core::types::{Rational, VideoFrame};
use tensorlink_pipeline::loopback::LoopbackEngine;
use tensorlink_pipeline::{BufferStatus, Pipeline, PipelineOptions};

const JSON_SCHEMA_VERSION: u32 = 1;

#[derive(Parser, Debug)]
#[command(
    name = "tlink",
    version,
    about = "Streaming tensor bridge for frame-by-frame inference engines",
    arg_required_else_help = true,
    after_help = "Examples:\n  tlink bench --frames 300 --json\n  tlink bench --batch-size 4 --buffer-threshold 2 --engine-delay-ms 5\n  tlink graph --input prompt.json --output streaming.json\n  tlink graph --input prompt.json --check"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a synthetic streaming benchmark over the loopback engine.
    Bench(BenchArgs),
    /// Rewrite a prompt graph for streaming, or validate one.
    Graph(GraphArgs),
}

#[derive(Args, Debug, Clone)]
struct BenchArgs {
    /// Number of synthetic frames to push through the bridge.
    #[arg(long = "frames", default_value_t = 300)]
    frames: u32,

    /// Synthetic frame width.
    #[arg(long = "width", default_value_t = 512)]
    width: u32,

    /// Synthetic frame height.
    #[arg(long = "height", default_value_t = 512)]
    height: u32,

    /// Frames per unit of engine work.
    #[arg(long = "batch-size", default_value_t = 1)]
    batch_size: usize,

    /// Batches accumulated before the first release.
    #[arg(long = "buffer-threshold", default_value_t = 2)]
    buffer_threshold: usize,

    /// Maximum batches the input channel may hold.
    #[arg(long = "max-queue-size", default_value_t = 5)]
    max_queue_size: usize,

    /// Simulated engine latency per submission, in milliseconds.
    #[arg(long = "engine-delay-ms", default_value_t = 0)]
    engine_delay_ms: u64,

    /// Emit the report as JSON on stdout.
    #[arg(long = "json")]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct GraphArgs {
    /// Source prompt graph (JSON).
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Where to write the rewritten graph; stdout when omitted.
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Only validate that the graph can be rewritten; write nothing.
    #[arg(long = "check")]
    check: bool,
}

#[derive(Serialize)]
struct BenchReport {
    schema_version: u32,
    frames: u32,
    elapsed_ms: u64,
    avg_fps: f64,
    buffer: BufferStatus,
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let json_error_command = match &cli.command {
        Commands::Bench(args) if args.json => Some("bench"),
        _ => None,
    };

    let result = match cli.command {
        Commands::Bench(args) => {
            let rt = build_runtime();
            rt.block_on(run_bench(args))
        }
        Commands::Graph(args) => run_graph(args),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            if let Some(command) = json_error_command {
                println!(
                    "{}",
                    serde_json::json!({
                        "schema_version": JSON_SCHEMA_VERSION,
                        "command": command,
                        "error": err.to_string(),
                        "code": err.error_code(),
                    })
                );
            } else {
                tracing::error!(error = %err, code = err.error_code(), "Command failed");
            }
            std::process::exit(err.error_code() as i32);
        }
    }
}

fn init_tracing() {
    let ansi_enabled = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(ansi_enabled)
        .init();
}

fn build_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
}

async fn run_bench(args: BenchArgs) -> Result<()> {
    let engine = if args.engine_delay_ms > 0 {
        Arc::new(LoopbackEngine::with_latency(std::time::Duration::from_millis(
            args.engine_delay_ms,
        )))
    } else {
        Arc::new(LoopbackEngine::new())
    };

    let pipeline = Arc::new(Pipeline::new(
        engine,
        PipelineOptions {
            width: args.width,
            height: args.height,
            buffer: BufferConfig::clamped(args.batch_size, args.buffer_threshold, args.max_queue_size),
        },
    ));

    let (width, height) = (args.width, args.height);
    let pixels = (width * height * 3) as usize;
    let frames = args.frames;
    let started = Instant::now();

    // Producer runs concurrently so channel backpressure is exercised
    // instead of deadlocking a sequential put/get loop.
    let producer = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            for i in 0..frames {
                let frame = VideoFrame {
                    data: vec![(i % 256) as u8; pixels],
                    width,
                    height,
                    pts: i64::from(i) * 3_000,
                    time_base: Rational::new(1, 90_000),
                };
                pipeline.submit_video_frame(frame).await?;
            }
            Ok::<(), LinkError>(())
        })
    };

    for i in 0..frames {
        let out = pipeline.next_video_frame().await?;
        if out.pts != i64::from(i) * 3_000 {
            return Err(LinkError::InvariantViolation(format!(
                "frame {i} egressed with pts {}, expected {}",
                out.pts,
                i64::from(i) * 3_000
            )));
        }
    }

    producer
        .await
        .map_err(|join_err| {
            LinkError::InvariantViolation(format!("producer task panicked: {join_err}"))
        })??;

    let elapsed = started.elapsed();
    let report = BenchReport {
        schema_version: JSON_SCHEMA_VERSION,
        frames,
        elapsed_ms: elapsed.as_millis() as u64,
        avg_fps: f64::from(frames) / elapsed.as_secs_f64(),
        buffer: pipeline.buffer_status(),
    };

    pipeline.shutdown().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report).expect("report serializes"));
    } else {
        tracing::info!(
            frames = report.frames,
            elapsed_ms = report.elapsed_ms,
            avg_fps = format!("{:.1}", report.avg_fps),
            "Bench finished"
        );
    }
    Ok(())
}

fn run_graph(args: GraphArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.input)
        .map_err(|e| LinkError::Graph(format!("cannot read {}: {e}", args.input.display())))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| LinkError::Graph(format!("{} is not valid JSON: {e}", args.input.display())))?;

    let rewritten = PromptGraph::from_json(value)?.rewrite_for_streaming()?;

    if args.check {
        tracing::info!(
            nodes = rewritten.len(),
            input = %args.input.display(),
            "Graph is streamable"
        );
        return Ok(());
    }

    let pretty =
        serde_json::to_string_pretty(&rewritten.to_json()).expect("graph serializes");
    match &args.output {
        Some(path) => {
            std::fs::write(path, pretty)
                .map_err(|e| LinkError::Graph(format!("cannot write {}: {e}", path.display())))?;
            tracing::info!(output = %path.display(), "Rewrote graph for streaming");
        }
        None => println!("{pretty}"),
    }
    Ok(())
}
