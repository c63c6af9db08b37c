//! Config loading: TOML file deserialized into [`RunConfig`], with unset
//! API keys and base URLs filled from the environment. This is the only
//! place the process environment is consulted; the core reads everything
//! from the config it is handed.

use std::path::Path;

use anyhow::{Context, Result};

use mf_domain::config::{ProviderConfig, RunConfig};

pub fn load(path: &Path) -> Result<RunConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut config: RunConfig = toml::from_str(&text).context("parsing run configuration")?;
    populate_from_env(&mut config);
    Ok(config)
}

/// Fill empty `api_key` fields from conventional environment variables.
/// Applied once at startup; explicit config values always win.
pub fn populate_from_env(config: &mut RunConfig) {
    let mut providers: Vec<&mut ProviderConfig> = Vec::new();
    if let Some(llm) = config.main_agent.llm.as_mut() {
        providers.push(llm);
    }
    for profile in config.sub_agents.values_mut() {
        if let Some(llm) = profile.llm.as_mut() {
            providers.push(llm);
        }
    }
    if let Some(llm) = config.extraction.extraction_llm.as_mut() {
        providers.push(llm);
    }

    for provider in providers {
        if !provider.api_key.is_empty() {
            continue;
        }
        if let Some(key) = default_api_key(&provider.base_url) {
            provider.api_key = key;
        }
    }
}

/// Pick the conventional key variable for a base URL, falling back to
/// `MIROFLOW_API_KEY`.
fn default_api_key(base_url: &str) -> Option<String> {
    let candidates: &[&str] = if base_url.contains("openrouter") {
        &["OPENROUTER_API_KEY", "MIROFLOW_API_KEY"]
    } else if base_url.contains("anthropic") {
        &["ANTHROPIC_API_KEY", "MIROFLOW_API_KEY"]
    } else if base_url.contains("openai") {
        &["OPENAI_API_KEY", "MIROFLOW_API_KEY"]
    } else {
        &["MIROFLOW_API_KEY"]
    };
    candidates
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_round_trips_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("miroflow.toml");
        std::fs::write(
            &path,
            r#"
            [main_agent]
            max_turns = 5

            [main_agent.llm]
            dialect = "claude-chat"
            base_url = "https://openrouter.example/api/v1"
            api_key = "explicit-key"
            model = "claude-sonnet"
            "#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.main_agent.max_turns, 5);
        let llm = config.main_agent.llm.unwrap();
        assert_eq!(llm.api_key, "explicit-key", "explicit keys are kept");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load(Path::new("/definitely/not/here.toml")).is_err());
    }
}
