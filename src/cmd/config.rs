//! Configuration view and validation commands — `forge config`.

use anyhow::Result;
use forge::forge_config::{DEFAULT_CONFIG, ForgeToml};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    let forge_dir = project_dir.join(".forge");
    let config_path = forge_dir.join("forge.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Forge Configuration");
            println!("===================");
            println!();

            let mut toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                ForgeToml::load(&config_path)?
            } else {
                println!("No forge.toml found at {}", config_path.display());
                println!("Using default configuration.");
                ForgeToml::default()
            };
            println!();
            print_sections(&toml);

            toml.apply_env_overrides();
            println!("Effective values (with env overrides):");
            println!("  server.port = {}", toml.server.port);
            println!("  logging.level = \"{}\"", toml.logging.level);
            println!("  logging.format = \"{}\"", toml.logging.format);
            println!();

            if !config_path.exists() {
                println!("Run 'forge config init' to create a forge.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No forge.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = ForgeToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("forge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&forge_dir)?;
            std::fs::write(&config_path, DEFAULT_CONFIG)?;

            println!("Created forge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port");
            println!("  - [logging] level, format, file");
            println!("  - [[providers]] template, http and external providers");
            println!("  - [quality.rules.<name>] quality gate rules");
            println!();
        }
    }

    Ok(())
}

fn print_sections(toml: &ForgeToml) {
    println!("[server]");
    println!("  host = \"{}\"", toml.server.host);
    println!("  port = {}", toml.server.port);
    println!("  dev_mode = {}", toml.server.dev_mode);
    println!();

    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  format = \"{}\"", toml.logging.format);
    if let Some(file) = &toml.logging.file {
        println!("  file = \"{}\"", file);
    }
    println!();

    println!("[storage]");
    println!("  persist = {}", toml.storage.persist);
    if let Some(dir) = &toml.storage.projects_dir {
        println!("  projects_dir = \"{}\"", dir.display());
    }
    println!();

    for provider in &toml.providers {
        println!("[[providers]]");
        println!("  id = \"{}\"", provider.id);
        println!("  kind = \"{}\"", provider.kind);
        if let Some(url) = &provider.base_url {
            println!("  base_url = \"{}\"", url);
        }
        println!();
    }

    if !toml.quality.rules.is_empty() {
        println!("[quality.rules]");
        for name in toml.quality.rules.keys() {
            println!("  {}", name);
        }
        println!();
    }
}
