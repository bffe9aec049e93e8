use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(
    name = "glue",
    author,
    version,
    about = "Compile and preview WebGL-style image filters on the GPU"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a filter's shaders and print diagnostics (no GPU needed).
    Check(CheckArgs),
    /// Composite an image through a filter and write the result as PNG.
    Render(RenderArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Filter document (JSON with `fragmentShader`, `vertexShader`, `settings`).
    #[arg(value_name = "FILTER")]
    pub filter: PathBuf,

    /// Print diagnostics as a JSON array instead of `stage:line: message`.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[arg(value_name = "FILTER")]
    pub filter: PathBuf,

    /// Input image (png, jpeg, bmp, gif).
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Output PNG path.
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,

    /// Engine configuration (TOML).
    #[arg(long, env = "GLUE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override a setting value, e.g. `--set strength=0.8` or `--set tint='"#ff0000"'`.
    #[arg(long = "set", value_name = "KEY=JSON", value_parser = parse_assignment)]
    pub values: Vec<(String, Value)>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

/// Splits `key=value`; the value is parsed as JSON, falling back to a plain
/// string so `--set tint=#ff0000` works without extra quoting.
fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing setting key in '{raw}'"));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}
