//! genai-config: inspect and validate core configuration files.
//!
//! Usage:
//!   genai-config check <path>     Load, apply GENAI_* overrides, validate, print
//!   genai-config defaults         Print the default configuration as YAML

use anyhow::{bail, Context};
use genai_core::CoreConfig;

fn main() -> anyhow::Result<()> {
    genai_core::logging::init_tracing("warn");

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("check") => {
            let Some(path) = args.get(2) else {
                print_usage();
                bail!("check needs a configuration path");
            };
            cmd_check(path)
        }
        Some("defaults") => cmd_defaults(),
        Some("version" | "--version" | "-V") => {
            println!("genai-config {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}");
        }
        None => {
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"genai-config: core configuration tool

USAGE:
    genai-config <COMMAND>

COMMANDS:
    check <path>    Load a YAML file, apply overrides, validate, print the result
    defaults        Print the default configuration
    version         Show version information
    help            Show this help message

ENVIRONMENT:
    GENAI_ATTEMPT_TIMEOUT_MS, GENAI_MAX_RETRIES, GENAI_STREAM_DEADLINE_MS,
    GENAI_JOB_MAX_RETRIES, GENAI_CACHE_SWEEP_SECS"#
    );
}

fn cmd_check(path: &str) -> anyhow::Result<()> {
    let config = CoreConfig::load(path).with_context(|| format!("invalid configuration: {path}"))?;
    println!("# {path}: OK");
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn cmd_defaults() -> anyhow::Result<()> {
    let config = CoreConfig::default();
    config.validate()?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
