//! Provider listing — `forge providers`.

use anyhow::Result;
use console::style;
use forge::forge_config::ForgeConfig;

pub fn cmd_providers(config: &ForgeConfig) -> Result<()> {
    let registry = config.toml.build_registry()?;

    println!();
    if registry.is_empty() {
        println!("No providers configured.");
        println!("Add a [[providers]] entry to {}", config.config_file().display());
        println!();
        return Ok(());
    }

    println!("Providers");
    println!("=========");
    println!();
    for descriptor in registry.list() {
        let caps = &descriptor.capabilities;
        let stages = match caps.expected_stages {
            0 => "stages unknown".to_string(),
            n => format!("{} stages", n),
        };
        let cancel = if caps.supports_cancel {
            "cancellable"
        } else {
            "not cancellable"
        };
        println!(
            "  {:<16} {}  {}",
            style(&descriptor.id).bold(),
            descriptor.name,
            style(format!("({}, {})", stages, cancel)).dim()
        );
    }
    println!();
    Ok(())
}
