use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use lifelens_contracts::{Category, DecisionRequest, ImageInput, Tier, UsageKind, Weather};
use lifelens_engine::{CancelToken, DecisionError, DecisionOrchestrator, EngineConfig};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "lifelens", version, about = "LifeLens decision engine CLI")]
struct Cli {
    /// Directory holding the quota file and the decision history.
    #[arg(long, global = true, default_value = ".lifelens")]
    state_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Decide(DecideArgs),
    Describe(DescribeArgs),
    Quota(QuotaArgs),
    SetTier(SetTierArgs),
    History(HistoryArgs),
    Prune,
}

#[derive(Debug, Args)]
struct DecideArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    question: String,
    /// Photo option as PATH or PATH=LABEL. Repeat per option.
    #[arg(long = "image", value_name = "PATH[=LABEL]", conflicts_with = "options")]
    images: Vec<String>,
    /// Text option. Repeat per option.
    #[arg(long = "option", value_name = "TEXT")]
    options: Vec<String>,
    #[arg(long)]
    mood: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    weather: Option<String>,
    #[arg(long, requires = "weather", allow_negative_numbers = true)]
    temperature: Option<f64>,
    #[arg(long, requires = "weather")]
    humidity: Option<f64>,
    /// Store this tier for the user before deciding.
    #[arg(long)]
    tier: Option<Tier>,
}

#[derive(Debug, Args)]
struct DescribeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    label: Option<String>,
    #[arg(long)]
    category: Option<Category>,
    #[arg(long, default_value = "free")]
    tier: Tier,
}

#[derive(Debug, Args)]
struct QuotaArgs {
    #[arg(long)]
    user: String,
    #[arg(long, default_value = "decision")]
    kind: UsageKind,
}

#[derive(Debug, Args)]
struct SetTierArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    tier: Tier,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[arg(long)]
    user: String,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lifelens error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so stdout carries only the JSON result.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = env::var("LIFELENS_LOG_FORMAT")
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);
    let _ = if json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let orchestrator = DecisionOrchestrator::open(EngineConfig::from_env(), &cli.state_dir)?;
    let code = match cli.command {
        Command::Decide(args) => run_decide(&orchestrator, args)?,
        Command::Describe(args) => run_describe(&orchestrator, args)?,
        Command::Quota(args) => {
            print_json(&orchestrator.quota_status(&args.user, args.kind))?;
            0
        }
        Command::SetTier(args) => {
            orchestrator.set_tier(&args.user, args.tier)?;
            print_json(&json!({"userId": args.user, "tier": args.tier}))?;
            0
        }
        Command::History(args) => {
            let preferences = orchestrator.preferences(&args.user)?;
            let records = orchestrator.recent_history(&args.user, args.limit)?;
            print_json(&json!({"preferences": preferences, "records": records}))?;
            0
        }
        Command::Prune => {
            print_json(&orchestrator.prune_cache())?;
            0
        }
    };
    let joined = orchestrator.flush_background()?;
    tracing::debug!(joined, "background jobs flushed");
    Ok(code)
}

fn run_decide(orchestrator: &DecisionOrchestrator, args: DecideArgs) -> Result<i32> {
    if let Some(tier) = args.tier {
        orchestrator.set_tier(&args.user, tier)?;
    }
    let request = build_request(&args)?;
    match orchestrator.decide(&args.user, &request, &CancelToken::new()) {
        Ok(response) => {
            print_json(&response)?;
            Ok(0)
        }
        Err(err) => {
            print_json(&error_payload(&err))?;
            Ok(exit_code_for(&err))
        }
    }
}

fn run_describe(orchestrator: &DecisionOrchestrator, args: DescribeArgs) -> Result<i32> {
    let bytes = read_option_image(&args.image)?;
    let label = args.label.unwrap_or_else(|| default_label(&args.image));
    let descriptor = orchestrator.describe(&ImageInput::new(bytes, label), args.category, args.tier);
    print_json(&descriptor)?;
    Ok(0)
}

fn build_request(args: &DecideArgs) -> Result<DecisionRequest> {
    let mut images = Vec::with_capacity(args.images.len().max(args.options.len()));
    let mut labels = Vec::new();
    for raw in &args.images {
        let (path, label) = parse_image_arg(raw);
        images.push(ImageInput::new(read_option_image(&path)?, ""));
        labels.push(label.unwrap_or_default());
    }
    for text in &args.options {
        images.push(ImageInput::text_option(text.trim()));
    }
    let weather = args.weather.as_ref().map(|description| Weather {
        description: description.clone(),
        temperature: args.temperature,
        humidity: args.humidity,
    });
    Ok(DecisionRequest {
        question: args.question.clone(),
        mood: args.mood.clone(),
        category: args.category.clone(),
        images,
        labels,
        weather,
    })
}

/// `PATH=LABEL` splits on the last `=`; a bare path has no label.
fn parse_image_arg(raw: &str) -> (PathBuf, Option<String>) {
    match raw.rsplit_once('=') {
        Some((path, label)) if !path.is_empty() && !label.contains(['/', '\\']) => {
            let label = label.trim();
            (
                PathBuf::from(path),
                (!label.is_empty()).then(|| label.to_string()),
            )
        }
        _ => (PathBuf::from(raw), None),
    }
}

fn read_option_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
}

fn default_label(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| stem.replace(['_', '-'], " "))
        .unwrap_or_else(|| "Option 1".to_string())
}

fn error_payload(err: &DecisionError) -> Value {
    let mut payload = json!({
        "error": err.to_string(),
        "status": err.status_code(),
    });
    if let DecisionError::QuotaExceeded { reset_time, .. } = err {
        payload["resetTime"] = json!(reset_time);
    }
    payload
}

fn exit_code_for(err: &DecisionError) -> i32 {
    match err.status_code() {
        400 => 2,
        429 => 3,
        504 => 4,
        _ => 1,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
