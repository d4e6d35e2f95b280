//!
//! chatsql replay tool
//! -------------------
//! Replays a recorded model turn against a JSON fixture (schema plus canned query
//! results) and prints the response the pipeline would have produced.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use chatsql::{PipelineConfig, RenderMode, ReplayFixture};

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} --fixture <file.json> [--model-file <file>] [--model-text <text>] [--input <question>] [--mode simple|enhanced] [--json]\n\nFlags:\n  --fixture <path>      Fixture with tables, results, default, model_text, user_input\n  --model-file <path>   Read the model turn from a file instead of the fixture\n  --model-text <text>   Model turn given inline\n  --input <text>        User question (overrides the fixture)\n  --mode <m>            Render mode; defaults to CHATSQL_RENDER_MODE or simple\n  --json                Print the full outcome (states, fixes, error) as JSON\n  -h, --help            Show this help"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let mut args: Vec<String> = env::args().collect();
    let program = args.remove(0);

    let mut fixture_path: Option<PathBuf> = None;
    let mut model_file: Option<PathBuf> = None;
    let mut model_text: Option<String> = None;
    let mut user_input: Option<String> = None;
    let mut mode: Option<RenderMode> = None;
    let mut as_json = false;

    let mut i = 0;
    while i < args.len() {
        let needs_value = matches!(args[i].as_str(), "--fixture" | "--model-file" | "--model-text" | "--input" | "--mode");
        if needs_value && i + 1 >= args.len() {
            eprintln!("{} requires a value", args[i]);
            print_usage(&program);
            std::process::exit(2);
        }
        match args[i].as_str() {
            "--fixture" => fixture_path = Some(PathBuf::from(&args[i + 1])),
            "--model-file" => model_file = Some(PathBuf::from(&args[i + 1])),
            "--model-text" => model_text = Some(args[i + 1].clone()),
            "--input" => user_input = Some(args[i + 1].clone()),
            "--mode" => match RenderMode::parse(&args[i + 1]) {
                Some(m) => mode = Some(m),
                None => {
                    eprintln!("unknown mode '{}'", args[i + 1]);
                    std::process::exit(2);
                }
            },
            "--json" => {
                as_json = true;
                i += 1;
                continue;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return Ok(());
            }
            other => {
                eprintln!("unknown argument '{}'", other);
                print_usage(&program);
                std::process::exit(2);
            }
        }
        i += 2;
    }

    let Some(path) = fixture_path else {
        print_usage(&program);
        std::process::exit(2);
    };
    let mut fixture = ReplayFixture::load(&path)?;
    if let Some(file) = model_file {
        fixture.model_text = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    }
    if let Some(text) = model_text {
        fixture.model_text = text;
    }
    if let Some(input) = user_input {
        fixture.user_input = input;
    }

    let mut config = PipelineConfig::from_env();
    if let Some(m) = mode {
        config.render_mode = m;
    }
    info!(
        target: "chatsql::replay",
        "replaying {} ({} tables, {} canned results, mode {:?})",
        path.display(),
        fixture.tables.len(),
        fixture.results.len(),
        config.render_mode
    );

    let outcome = fixture.replay(config).await;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome.text);
    }
    Ok(())
}
