use anyhow::{Context, Result};
use geojson::FeatureCollection;
use log::info;
use serde_json::Value;
use ureq::Agent;

use crate::{bbox::BBox, convert};

/// Replaced with the bbox in `south,west,north,east` order.
pub const BBOX_PLACEHOLDER: &str = "{{bbox}}";

/// Anything that can answer an Overpass QL query with the raw JSON response.
pub trait GeodataSource {
    fn query(&self, q: &str) -> Result<Value>;
}

pub struct Overpass {
    agent: Agent,
    url: String,
}

impl Overpass {
    pub fn new(agent: Agent, url: impl Into<String>) -> Self {
        Self {
            agent,
            url: url.into(),
        }
    }
}

impl GeodataSource for Overpass {
    fn query(&self, q: &str) -> Result<Value> {
        info!("Querying {}", self.url);
        self.agent
            .post(&self.url)
            .send_form(&[("data", q)])
            .context("Overpass API request failed")?
            .into_json()
            .context("Failed to parse Overpass API response")
    }
}

pub fn fetch_geojson(source: &impl GeodataSource, q: &str) -> Result<FeatureCollection> {
    let payload = source.query(q)?;
    Ok(convert::convert(&payload)?)
}

pub fn with_bbox(q: &str, bbox: &BBox) -> String {
    q.replace(BBOX_PLACEHOLDER, &bbox.overpass())
}

/// Prefixes the settings block unless the query's first statement already
/// asks for JSON output.
pub fn ensure_json_output(q: &str, timeout_secs: u64) -> String {
    let settings = q.split(';').next().unwrap_or_default().trim_start();
    if settings.starts_with('[') && settings.contains("[out:json]") {
        q.to_string()
    } else {
        format!("[out:json][timeout:{timeout_secs}]; {q}")
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use serde_json::json;

    use super::*;
    use crate::convert::ConvertError;

    struct Canned {
        response: Value,
        seen: RefCell<Vec<String>>,
    }

    impl GeodataSource for Canned {
        fn query(&self, q: &str) -> Result<Value> {
            self.seen.borrow_mut().push(q.to_string());
            Ok(self.response.clone())
        }
    }

    #[test]
    fn fetch_converts_response() {
        let source = Canned {
            response: json!({
                "version": 0.6,
                "elements": [{"type": "node", "id": 1, "lat": 1.0, "lon": 2.0}]
            }),
            seen: RefCell::default(),
        };
        let collection = fetch_geojson(&source, "node(1); out;").unwrap();
        assert_eq!(collection.features.len(), 1);
        assert_eq!(source.seen.borrow().as_slice(), ["node(1); out;"]);
    }

    #[test]
    fn fetch_rejects_response_without_elements() {
        let source = Canned {
            response: json!({"remark": "runtime error"}),
            seen: RefCell::default(),
        };
        let err = fetch_geojson(&source, "out;").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::MissingElements)
        ));
    }

    #[test]
    fn bbox_substitution() {
        let bbox: BBox = "139.6,35.5,139.9,35.8".parse().unwrap();
        assert_eq!(
            with_bbox(r#"node["amenity"="cafe"]({{bbox}}); out geom;"#, &bbox),
            r#"node["amenity"="cafe"](35.5,139.6,35.8,139.9); out geom;"#
        );
    }

    #[test]
    fn json_output_prefix() {
        assert_eq!(
            ensure_json_output("node(1); out;", 25),
            "[out:json][timeout:25]; node(1); out;"
        );
        assert_eq!(
            ensure_json_output("[out:json][timeout:60]; node(1); out;", 25),
            "[out:json][timeout:60]; node(1); out;"
        );
    }

    #[test]
    fn json_output_anywhere_in_settings_block() {
        assert_eq!(
            ensure_json_output("[timeout:25][out:json]; node(1); out;", 60),
            "[timeout:25][out:json]; node(1); out;"
        );
        assert_eq!(
            ensure_json_output("  [bbox:1,2,3,4][out:json][timeout:10];\nway; out geom;", 60),
            "  [bbox:1,2,3,4][out:json][timeout:10];\nway; out geom;"
        );
        // a tag value that merely looks like the setting doesn't count
        assert_eq!(
            ensure_json_output("node[\"note\"=\"[out:json]\"]; out;", 60),
            "[out:json][timeout:60]; node[\"note\"=\"[out:json]\"]; out;"
        );
    }
}
