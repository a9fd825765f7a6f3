use std::{env, fs::read_to_string, path::Path};

use anyhow::{bail, Context, Result};
use log::warn;
use serde::Deserialize;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub overpass_url: String,
    pub openai_url: String,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    pub language: String,
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            overpass_url: "https://overpass-api.de/api/interpreter".to_string(),
            openai_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
            language: "en".to_string(),
            api_key: None,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            warn!("Settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        serde_json::from_str(&read_to_string(path)?)
            .with_context(|| format!("failed to parse settings file {}", path.display()))
    }

    /// The environment takes priority over the settings file.
    pub fn api_key(&self) -> Result<String> {
        self.api_key_from(env::var(API_KEY_VAR).ok())
    }

    fn api_key_from(&self, env: Option<String>) -> Result<String> {
        match env
            .into_iter()
            .chain(self.api_key.clone())
            .find(|x| !x.trim().is_empty())
        {
            Some(x) => Ok(x),
            None => bail!(
                "OpenAI API key not found. Set {API_KEY_VAR} or add api_key to the settings file."
            ),
        }
    }
}
