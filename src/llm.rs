use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use ureq::Agent;

use crate::bbox::BBox;

const SYSTEM_PROMPT: &str = include_str!("prompt.md");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Advisory only; conversion derives geometry from the data itself, so
/// values we don't recognise are kept as [`ExpectedGeometry::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpectedGeometry {
    #[serde(alias = "Point")]
    Point,
    #[serde(alias = "Line")]
    Line,
    #[serde(alias = "Polygon")]
    Polygon,
    #[serde(other)]
    Other,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Directive {
    Chat {
        message: String,
    },
    Query {
        description: String,
        overpass_query: String,
        expected_geometry: ExpectedGeometry,
        notes: String,
    },
}

pub struct Request<'a> {
    pub message: &'a str,
    pub bbox: &'a BBox,
    pub history: &'a [Turn],
    pub language: &'a str,
}

/// Turns a user message into a [`Directive`].
pub trait Assistant {
    fn directive(&self, request: &Request) -> Result<Directive>;
}

pub struct OpenAi {
    pub agent: Agent,
    pub url: String,
    pub model: String,
    pub temperature: f64,
    pub api_key: String,
}

impl Assistant for OpenAi {
    fn directive(&self, request: &Request) -> Result<Directive> {
        info!("Asking {} for a directive", self.model);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user_content(request)?},
            ],
            "temperature": self.temperature,
        });

        let response: ChatResponse = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
            .context("OpenAI API request failed")?
            .into_json()
            .context("Failed to parse OpenAI API response")?;

        let content = response
            .choices
            .into_iter()
            .next()
            .context("Invalid response from OpenAI API: no choices")?
            .message
            .content
            .context("Invalid response from OpenAI API: empty message")?;

        parse_directive(&content)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn user_content(request: &Request) -> Result<String> {
    Ok(serde_json::to_string(&json!({
        "user_message": request.message,
        "bbox": request.bbox.overpass(),
        "chat_history": request.history,
        "language": request.language,
    }))?)
}

pub fn parse_directive(content: &str) -> Result<Directive> {
    let directive: Directive = serde_json::from_str(strip_code_fence(content))
        .with_context(|| format!("Failed to parse LLM response: {content}"))?;

    if let Directive::Query { overpass_query, .. } = &directive {
        if overpass_query.trim().is_empty() {
            bail!("Empty overpass_query in LLM response");
        }
    }

    Ok(directive)
}

/// Models sometimes wrap the JSON in a markdown fence.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|x| x.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
