use std::process::ExitCode;

use anyhow::{Context, Result};
use glue::{check_program, Glue, GlueConfig, FILTER_PROGRAM, INPUT_TEXTURE};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{CheckArgs, RenderArgs};
use crate::filter::FilterDocument;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn check(args: CheckArgs) -> Result<ExitCode> {
    let document = FilterDocument::load(&args.filter)?;
    let diagnostics = match check_program(&document.descriptor()) {
        Ok(checked) => {
            debug!(
                filter = document.label(),
                uniforms = ?checked.layout().names().collect::<Vec<_>>(),
                "filter compiled"
            );
            Vec::new()
        }
        Err(err) => err.into_diagnostics(),
    };

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&diagnostics).context("failed to encode diagnostics")?;
        println!("{rendered}");
    } else if diagnostics.is_empty() {
        println!("{}: ok", document.label());
    } else {
        for entry in &diagnostics {
            for message in &entry.messages {
                println!("{}:{}: {}", entry.stage, entry.line, message);
            }
        }
    }

    Ok(if diagnostics.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn render(args: RenderArgs) -> Result<ExitCode> {
    let config = match &args.config {
        Some(path) => GlueConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => GlueConfig::default(),
    };
    let document = FilterDocument::load(&args.filter)?;
    let image = image::open(&args.image)
        .with_context(|| format!("failed to open image {}", args.image.display()))?
        .to_rgba8();

    let mut values = document.default_values();
    for (key, raw) in &args.values {
        let Some(setting) = document.settings.iter().find(|setting| &setting.key == key) else {
            warn!(key = %key, "ignoring value for unknown setting");
            continue;
        };
        let value = setting
            .coerce(raw)
            .with_context(|| format!("invalid value for setting '{key}'"))?;
        values.insert(key.clone(), value);
    }

    let mut glue = Glue::new(&config).context("failed to initialise GPU context")?;
    let (width, height) = image.dimensions();
    glue.set_size(width, height)?;
    glue.register_texture(INPUT_TEXTURE, &image)?;
    glue.register_program_with(FILTER_PROGRAM, &document.descriptor())
        .with_context(|| format!("filter '{}' failed to build", document.label()))?;
    glue.composite(INPUT_TEXTURE, &[FILTER_PROGRAM], &values)?;

    let output = glue.read_pixels()?;
    output
        .save_with_format(&args.output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    glue.dispose()?;

    info!(
        filter = document.label(),
        width,
        height,
        output = %args.output.display(),
        "render complete"
    );
    Ok(ExitCode::SUCCESS)
}
