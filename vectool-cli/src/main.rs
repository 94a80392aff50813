use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;
use vectool_core::config::Config;
use vectool_core::context::DbContext;
use vectool_core::tool::{ToolRegistry, build_registry, is_error_result};

const KNOWN_EMBEDDING_FUNCTIONS: &[&str] = &["fastembed", "sentence-transformers", "hashing"];

#[derive(Parser)]
#[command(name = "vectool-cli")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "vectool.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the tool definitions as JSON
    Tools,
    /// Invoke one tool against the configured database
    Call {
        /// Tool name (e.g., list_tables)
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Pretty-print the effective config (file, defaults and environment) as TOML
    Show,
    /// Validate the config file
    Validate,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Show => show_config(&cli.config),
            ConfigAction::Validate => validate_config(&cli.config),
        },
        Command::Tools => list_tools(&cli.config),
        Command::Call { tool, args } => call_tool(&cli.config, &tool, &args),
    };

    match result {
        Ok(output) => print!("{output}"),
        Err(msg) => {
            eprint!("{msg}");
            process::exit(1);
        }
    }
}

fn load_config(config_path: &Path) -> Result<Config, String> {
    Config::load(config_path).map_err(|e| format!("Config error: {e}\n"))
}

fn show_config(config_path: &Path) -> Result<String, String> {
    Ok(load_config(config_path)?.to_toml_string())
}

fn validate_config(config_path: &Path) -> Result<String, String> {
    if !config_path.exists() {
        return Err(format!(
            "Config file not found: {}. Use --config to specify the path.\n",
            config_path.display()
        ));
    }
    let config = load_config(config_path)?;
    check_config(&config)?;
    Ok("Configuration is valid.\n".to_string())
}

fn check_config(config: &Config) -> Result<(), String> {
    let function = config.embedding.function.as_str();
    if !KNOWN_EMBEDDING_FUNCTIONS.contains(&function) {
        return Err(format!(
            "Config error: unknown embedding function '{function}'. Valid functions: {}\n",
            KNOWN_EMBEDDING_FUNCTIONS.join(", ")
        ));
    }
    if function == "hashing" && config.embedding.dimensions == 0 {
        return Err("Config error: embedding.dimensions must be positive\n".to_string());
    }
    if config.database.default_table.trim().is_empty() {
        return Err("Config error: database.default_table must not be empty\n".to_string());
    }
    if config.retry.max_retries == 0 {
        return Err("Config error: retry.max_retries must be at least 1\n".to_string());
    }
    Ok(())
}

fn open_registry(config_path: &Path) -> Result<ToolRegistry, String> {
    let config = load_config(config_path)?;
    check_config(&config)?;
    let ctx = DbContext::from_config(config).map_err(|e| format!("Embedding error: {e}\n"))?;
    Ok(build_registry(Arc::new(ctx)))
}

fn list_tools(config_path: &Path) -> Result<String, String> {
    let mut config = load_config(config_path)?;
    // Listing never embeds, so avoid loading a model.
    config.embedding.function = "hashing".into();
    if config.embedding.dimensions == 0 {
        config.embedding.dimensions = 1;
    }
    let ctx = DbContext::from_config(config).map_err(|e| format!("Embedding error: {e}\n"))?;
    let registry = build_registry(Arc::new(ctx));
    let defs = Value::Array(registry.tool_definitions());
    let text = serde_json::to_string_pretty(&defs).map_err(|e| format!("Error: {e}\n"))?;
    Ok(format!("{text}\n"))
}

fn call_tool(config_path: &Path, tool: &str, args: &str) -> Result<String, String> {
    let input: Value = serde_json::from_str(args).map_err(|e| format!("Invalid JSON arguments: {e}\n"))?;
    if !input.is_object() {
        return Err("Tool arguments must be a JSON object\n".to_string());
    }
    let registry = open_registry(config_path)?;
    log::debug!("calling {tool} with {input}");

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Error: {e}\n"))?;
    let result = runtime
        .block_on(registry.call(tool, input))
        .ok_or_else(|| format!("Unknown tool '{tool}'. Run 'vectool-cli tools' to list them.\n"))?;

    let failed = is_error_result(&result);
    let text = match result {
        Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).map_err(|e| format!("Error: {e}\n"))?,
    };
    if failed { Err(format!("{text}\n")) } else { Ok(format!("{text}\n")) }
}
