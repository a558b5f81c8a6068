//! Configuration view and validation commands: `hospital-admin config`.

use std::path::Path;

use anyhow::Result;

use hospital_admin::config::AppConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    effective: Result<AppConfig>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = effective?;
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found, showing defaults", config_path.display());
            }
            println!("# Effective values (file, environment and CLI overrides):");
            println!();
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            if !config_path.exists() {
                println!("No config file found. Using defaults (valid).");
                return Ok(());
            }

            let config = AppConfig::load(config_path)?;
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists.", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(config_path, AppConfig::default().to_toml()?)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
