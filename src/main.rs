use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use gradient_studio::config::{load_config, EditorConfig};
use gradient_studio::engine::{
    GpuEngine, ShaderEngine, ShaderSourceLoader, SoftwareEngine, Surface,
};
use gradient_studio::error_codes::{find_coded_error, CodedError, ErrorCode};
use gradient_studio::events::{EditorEvent, ErrorEvent, EventKind};
use gradient_studio::export::{CodeExportOptions, CodeFormat, ImageExportOptions, ImageFormat};
use gradient_studio::params::{parse_value_for, ParamKey, ParamOverride, ParameterSet};
use gradient_studio::presets::{preset_file_name, PresetStore};
use gradient_studio::validation::RuleSet;
use gradient_studio::{FacadeContext, FacadeError, ShaderFacade, UpdateOptions};

#[derive(Debug, Parser)]
#[command(name = "gradient-studio", version)]
#[command(about = "Presets, validation and headless export for the gradient shader")]
struct Cli {
    /// Editor config (YAML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Machine-readable output and error envelopes.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List every parameter with its category, default and rule.
    Params,
    /// List built-in and user presets.
    Presets,
    /// Check a value against a parameter's rule.
    Validate { name: String, value: String },
    /// Render one frame and write it as an image.
    Render(RenderArgs),
    /// Export the configuration as shader or web code.
    ExportCode(ExportCodeArgs),
    /// Save the current parameters as a user preset.
    SavePreset {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "preset")]
        base: Option<String>,
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Software,
    Gpu,
}

#[derive(Debug, clap::Args)]
struct RenderArgs {
    #[arg(short = 'o', long = "output")]
    output: PathBuf,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
    /// png, jpeg or webp; guessed from the output extension when omitted.
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    quality: Option<f32>,
    #[arg(long)]
    transparent: bool,
    #[arg(long)]
    high_quality: bool,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Shader time in seconds.
    #[arg(long)]
    time: Option<f32>,
    #[arg(long, value_enum, default_value_t = Backend::Software)]
    backend: Backend,
}

#[derive(Debug, clap::Args)]
struct ExportCodeArgs {
    #[arg(short = 'o', long = "output", required_unless_present = "stdout")]
    output: Option<PathBuf>,
    #[arg(long, conflicts_with = "output")]
    stdout: bool,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
    /// wgsl, javascript, typescript or html.
    #[arg(long)]
    format: String,
    #[arg(long)]
    minify: bool,
    /// Also copy the code to the clipboard.
    #[arg(long)]
    copy: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    match run(cli) {
        Ok(code) => code,
        Err(error) => report_error(&error, json),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => load_config(path).map_err(|error| {
            anyhow!(CodedError::usage(
                ErrorCode::ConfigError,
                format!("{error:#}")
            ))
        })?,
        None => EditorConfig::default(),
    };

    match cli.command {
        Commands::Params => run_params(cli.json),
        Commands::Presets => run_presets(&config, cli.json),
        Commands::Validate { name, value } => run_validate(&name, &value, cli.json),
        Commands::Render(args) => run_render(&config, args, cli.json),
        Commands::ExportCode(args) => run_export_code(&config, args, cli.json),
        Commands::SavePreset {
            name,
            description,
            base,
            set,
        } => run_save_preset(&config, &name, &description, base.as_deref(), &set, cli.json),
    }
}

fn report_error(error: &anyhow::Error, json: bool) -> ExitCode {
    let coded = classify(error);
    if json {
        match serde_json::to_string_pretty(&coded.envelope()) {
            Ok(text) => eprintln!("{text}"),
            Err(_) => eprintln!("error: {}: {}", coded.code, coded.message),
        }
    } else {
        eprintln!("error: {}: {}", coded.code, coded.message);
    }
    if coded.code.is_usage() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn classify(error: &anyhow::Error) -> CodedError {
    if let Some(facade) = error.downcast_ref::<FacadeError>() {
        return CodedError::new(facade.code(), facade.to_string());
    }
    match find_coded_error(error) {
        Some(coded) => coded.clone(),
        None => CodedError::new(ErrorCode::Internal, format!("{error:#}")),
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn run_params(json: bool) -> Result<ExitCode> {
    let rules = RuleSet::standard();
    let rows: Vec<_> = ParamKey::ALL
        .iter()
        .map(|key| {
            (
                *key,
                key.default_value(),
                rules.rule(*key).map(|rule| rule.describe()),
            )
        })
        .collect();

    if json {
        let entries: Vec<_> = rows
            .iter()
            .map(|(key, default, rule)| {
                json!({
                    "name": key.as_str(),
                    "category": key.category().as_str(),
                    "type": key.kind().label(),
                    "default": default,
                    "rule": rule,
                })
            })
            .collect();
        print_json(&json!({ "params": entries }))?;
    } else {
        for (key, default, rule) in rows {
            println!(
                "{:<22} {:<14} {:<8} default={:<10} {}",
                key.as_str(),
                key.category().as_str(),
                key.kind().label(),
                default.to_string(),
                rule.unwrap_or_default()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn load_presets(config: &EditorConfig) -> Result<PresetStore> {
    let mut store = PresetStore::with_builtins();
    if let Some(dir) = &config.presets.directory {
        store.load_directory(dir, &RuleSet::standard())?;
    }
    Ok(store)
}

fn run_presets(config: &EditorConfig, json: bool) -> Result<ExitCode> {
    let store = load_presets(config)?;
    if json {
        let entries: Vec<_> = store
            .list()
            .iter()
            .map(|preset| {
                json!({
                    "name": preset.name,
                    "description": preset.description,
                    "builtin": preset.builtin,
                    "params": preset.values.len(),
                    "colorStops": preset.color_stops.as_ref().map_or(0, Vec::len),
                })
            })
            .collect();
        print_json(&json!({ "presets": entries }))?;
    } else {
        for preset in store.list() {
            let kind = if preset.builtin { "built-in" } else { "user" };
            println!("{:<16} {:<9} {}", preset.name, kind, preset.description);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_validate(name: &str, raw: &str, json: bool) -> Result<ExitCode> {
    let key: ParamKey = name.parse()?;
    let value = parse_value_for(key, raw)?;
    let verdict = RuleSet::standard().validate(key, &value);

    if json {
        print_json(&json!({ "param": key.as_str(), "value": value, "result": verdict }))?;
    } else if verdict.valid {
        println!("{key} = {value}: valid");
    } else {
        println!(
            "{key} = {value}: invalid ({})",
            verdict.message.as_deref().unwrap_or("no reason given")
        );
        if let Some(suggested) = &verdict.suggested_value {
            println!("suggested: {suggested}");
        }
    }
    Ok(if verdict.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

type ErrorLog = Rc<RefCell<Vec<ErrorEvent>>>;

/// Builds, initializes and configures a facade: preset first, then overrides.
fn prepare<E: ShaderEngine>(
    engine: E,
    config: &EditorConfig,
    preset: Option<&str>,
    overrides: &[String],
) -> Result<(ShaderFacade<E>, ErrorLog)> {
    let overrides = overrides
        .iter()
        .map(|raw| ParamOverride::parse(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut facade = ShaderFacade::new(engine, FacadeContext::from_config(config)?);
    let errors: ErrorLog = Rc::default();
    let sink = Rc::clone(&errors);
    facade.on(EventKind::Error, move |event| {
        if let EditorEvent::Error(error) = event {
            sink.borrow_mut().push(error.clone());
        }
        Ok(())
    });
    facade.initialize(Surface::new("cli", config.render.width, config.render.height))?;

    if let Some(name) = preset {
        if !facade.apply_preset(name)? {
            return Err(last_error(&errors, "preset could not be applied"));
        }
    }
    if !overrides.is_empty() {
        let updates: Vec<_> = overrides
            .into_iter()
            .map(|item| (item.key, item.value))
            .collect();
        if !facade.batch_update_params(&updates, UpdateOptions::default())? {
            return Err(last_error(&errors, "overrides could not be applied"));
        }
    }
    Ok((facade, errors))
}

fn last_error(errors: &ErrorLog, fallback: &str) -> anyhow::Error {
    match errors.borrow().last() {
        Some(event) => anyhow!(CodedError::new(
            event.code.unwrap_or(ErrorCode::Internal),
            event.message.clone()
        )),
        None => anyhow!(CodedError::new(ErrorCode::Internal, fallback)),
    }
}

fn shader_loader(config: &EditorConfig) -> ShaderSourceLoader {
    match &config.shaders.directory {
        Some(dir) => ShaderSourceLoader::with_override_dir(dir),
        None => ShaderSourceLoader::embedded(),
    }
}

fn run_render(config: &EditorConfig, args: RenderArgs, json: bool) -> Result<ExitCode> {
    let loader = shader_loader(config);
    match args.backend {
        Backend::Software => {
            let engine = SoftwareEngine::with_shaders(ParameterSet::defaults(), loader);
            render_with(engine, config, &args, json)
        }
        Backend::Gpu => {
            let engine = pollster::block_on(GpuEngine::new(ParameterSet::defaults(), loader))?;
            render_with(engine, config, &args, json)
        }
    }
}

fn render_with<E: ShaderEngine>(
    engine: E,
    config: &EditorConfig,
    args: &RenderArgs,
    json: bool,
) -> Result<ExitCode> {
    let format = match &args.format {
        Some(name) => name.parse()?,
        None => ImageFormat::from_path(&args.output).unwrap_or(config.export.format),
    };
    let (mut facade, _errors) = prepare(engine, config, args.preset.as_deref(), &args.set)?;
    if let Some(time) = args.time {
        facade.seek(time)?;
    }

    let options = ImageExportOptions {
        format,
        quality: args.quality.unwrap_or(config.export.quality),
        transparent: args.transparent || config.export.transparent,
        high_quality: args.high_quality,
        width: args.width,
        height: args.height,
    };
    let export = facade.export_as_image(options)?;
    export.write_to(&args.output)?;
    facade.dispose();

    if json {
        print_json(&json!({
            "ok": true,
            "output": args.output.display().to_string(),
            "mime": export.mime,
            "width": export.width,
            "height": export.height,
            "bytes": export.bytes.len(),
        }))?;
    } else {
        println!(
            "Wrote {} ({}x{}, {})",
            args.output.display(),
            export.width,
            export.height,
            export.mime
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_export_code(config: &EditorConfig, args: ExportCodeArgs, json: bool) -> Result<ExitCode> {
    let format: CodeFormat = args.format.parse()?;
    let engine = SoftwareEngine::with_shaders(ParameterSet::defaults(), shader_loader(config));
    let (mut facade, _errors) = prepare(engine, config, args.preset.as_deref(), &args.set)?;
    let code = facade.export_as_code(CodeExportOptions {
        format,
        minify: args.minify,
    })?;
    facade.dispose();

    if args.copy {
        copy_to_clipboard(&code)?;
    }

    match &args.output {
        Some(path) => {
            write_text(path, &code)?;
            if json {
                print_json(&json!({
                    "ok": true,
                    "output": path.display().to_string(),
                    "format": format.to_string(),
                    "bytes": code.len(),
                }))?;
            } else {
                println!("Wrote {} ({format}, {} bytes)", path.display(), code.len());
            }
        }
        None => print!("{code}"),
    }
    Ok(ExitCode::SUCCESS)
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(feature = "clipboard")]
fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("failed to open clipboard")?;
    clipboard
        .set_text(text.to_owned())
        .context("failed to copy code to clipboard")?;
    tracing::info!(bytes = text.len(), "code copied to clipboard");
    Ok(())
}

#[cfg(not(feature = "clipboard"))]
fn copy_to_clipboard(_text: &str) -> Result<()> {
    Err(anyhow!(CodedError::usage(
        ErrorCode::UnsupportedFormat,
        "clipboard support is not compiled in (enable the 'clipboard' feature)"
    )))
}

fn run_save_preset(
    config: &EditorConfig,
    name: &str,
    description: &str,
    base: Option<&str>,
    overrides: &[String],
    json: bool,
) -> Result<ExitCode> {
    let Some(dir) = config.presets.directory.clone() else {
        return Err(anyhow!(CodedError::usage(
            ErrorCode::ConfigError,
            "no preset directory configured (set presets.directory in --config)"
        )));
    };
    let engine = SoftwareEngine::with_shaders(ParameterSet::defaults(), shader_loader(config));
    let (mut facade, errors) = prepare(engine, config, base, overrides)?;
    if !facade.save_preset(name, description)? {
        return Err(last_error(&errors, "preset could not be saved"));
    }
    facade.dispose();

    let path = dir.join(preset_file_name(name));
    if json {
        print_json(&json!({ "ok": true, "preset": name, "path": path.display().to_string() }))?;
    } else {
        println!("Saved preset '{name}' to {}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}
