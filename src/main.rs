use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use docxtmpl::package::Package;
use docxtmpl::{data, DocumentGenerator, RenderConfig, TemplateEngine, Validator, Value};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a template with data into a new document
    Render {
        /// Template document (.docx)
        #[arg(short, long)]
        template: PathBuf,
        /// Data file (.json, .yaml or .yml)
        #[arg(short, long)]
        data: PathBuf,
        /// Output document
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Check a template for errors without rendering it
    Validate {
        #[arg(short, long)]
        template: PathBuf,
        /// Also report fields missing from this data file
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
    /// List the data fields a template reads
    Fields {
        #[arg(short, long)]
        template: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            RenderConfig::load(path).context("Failed to load config")?
        }
        None => RenderConfig::default(),
    };

    match cli.command {
        Commands::Render { template, data, output } => {
            render(&config, &template, &data, &output)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { template, data } => validate(&config, &template, data.as_deref()),
        Commands::Fields { template } => {
            fields(&config, &template)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_data(path: &Path) -> Result<Value> {
    Ok(data::normalize(&load_json(path)?)?)
}

fn load_json(path: &Path) -> Result<serde_json::Value> {
    info!("Loading data from {:?}", path);
    let content = std::fs::read_to_string(path).context("Failed to read data file")?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let json: serde_json::Value = if is_yaml {
        serde_yaml::from_str(&content).context("Failed to parse YAML data")?
    } else {
        serde_json::from_str(&content).context("Failed to parse JSON data")?
    };
    Ok(json)
}

fn render(config: &RenderConfig, template: &Path, data: &Path, output: &Path) -> Result<()> {
    let data = load_json(data)?;
    let generator = DocumentGenerator::from_config(config.clone())?;
    if let Err(err) = generator.render_file(template, &data, output) {
        error!("{}", err);
        for suggestion in &err.suggestions {
            eprintln!("  hint: {}", suggestion);
        }
        return Err(err).context(format!("Failed to render {:?}", template));
    }
    info!("✓ Rendered {:?} -> {:?}", template, output);
    Ok(())
}

fn validate(config: &RenderConfig, template: &Path, data: Option<&Path>) -> Result<ExitCode> {
    let mut data = data.map(load_data).transpose()?;
    if let Some(data) = data.as_mut() {
        config.merge_globals(data);
    }
    let validator = Validator::from_config(config)?;
    let result = validator.validate_file(template, data.as_ref());

    if result.is_valid() {
        println!("{}: no problems found", template.display());
        return Ok(ExitCode::SUCCESS);
    }
    for (location, diagnostics) in result.by_location() {
        println!("{}:", location);
        for diagnostic in diagnostics {
            match &diagnostic.placeholder {
                Some(placeholder) => println!("  [{}] {} ({})", diagnostic.code, diagnostic.message, placeholder),
                None => println!("  [{}] {}", diagnostic.code, diagnostic.message),
            }
            for suggestion in &diagnostic.suggestions {
                println!("      hint: {}", suggestion);
            }
        }
    }
    Ok(ExitCode::FAILURE)
}

fn fields(config: &RenderConfig, template: &Path) -> Result<()> {
    let package = Package::open(template)?;
    let engine: TemplateEngine = config.build_engine()?;
    let mut seen = std::collections::BTreeSet::new();
    for path in package.processable_paths() {
        let Some(part) = package.part(&path) else {
            continue;
        };
        let prepared = docxtmpl::generator::prepare_part(
            &part.text()?,
            part.role,
            config.row_scan_timeout(),
            config.normalize_smart_quotes,
        )?;
        let parsed = engine
            .parse(&path, &prepared.xml)
            .map_err(docxtmpl::Error::from)
            .with_context(|| format!("Failed to parse {}", path))?;
        for field in parsed.field_paths() {
            if seen.insert(field.to_string()) {
                println!("{}", field);
            }
        }
    }
    Ok(())
}
