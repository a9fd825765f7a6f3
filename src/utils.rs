use std::{borrow::Cow, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};
use ureq::{Agent, AgentBuilder};

use crate::settings::Settings;

pub fn agent(settings: &Settings) -> Agent {
    AgentBuilder::new()
        .user_agent(concat!("osm-agent/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()
}

pub fn spinner(message: impl Into<Cow<'static, str>>) -> ProgressBar {
    let bar = ProgressBar::new_spinner()
        .with_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]").expect("hardcoded"))
        .with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// File name for a layer, derived from its display name.
pub fn layer_file_name(name: &str) -> String {
    let mut stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.trim().is_empty() {
        stem = "osm_data".to_string();
    }
    stem.push_str(".geojson");
    stem
}
