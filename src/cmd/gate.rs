//! Standalone artifact evaluation — `forge gate <artifact.json>`.

use anyhow::{Context, Result};
use chrono::Utc;
use forge::forge_config::ForgeConfig;
use forge::ui::format_verdict;
use forge_common::Artifact;
use std::path::Path;

/// Job id recorded on verdicts produced outside of any job.
const STANDALONE_JOB_ID: i64 = 0;

pub fn cmd_gate(config: &ForgeConfig, artifact_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(artifact_path)
        .with_context(|| format!("Failed to read {}", artifact_path.display()))?;
    let artifact: Artifact = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse artifact {}", artifact_path.display()))?;

    let gate = config.toml.build_gate()?;
    let verdict = gate.evaluate(STANDALONE_JOB_ID, &artifact, Utc::now())?;

    println!("{}", format_verdict(&verdict));
    if !verdict.passed {
        anyhow::bail!("Artifact '{}' rejected by quality gate", artifact.name);
    }
    Ok(())
}
