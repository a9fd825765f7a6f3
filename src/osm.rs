use std::{collections::BTreeMap, fmt};

use geo::Coord;
use log::debug;
use serde::Deserialize;
use serde_json::Value;

pub type Tags = BTreeMap<String, String>;

/// Feature ids are rendered as `node/<id>` and `way/<id>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OsmId {
    Node(u64),
    Way(u64),
}

impl fmt::Display for OsmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(x) => write!(f, "node/{x}"),
            Self::Way(x) => write!(f, "way/{x}"),
        }
    }
}

/// A latitude/longitude pair as Overpass emits it. Either half may be absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct RawPosition {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl RawPosition {
    /// Interchange order: `x` is longitude, `y` is latitude.
    pub fn coord(&self) -> Option<Coord> {
        Some(Coord {
            x: self.lon?,
            y: self.lat?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RawElement {
    Node(RawNode),
    Way(RawWay),
    /// Relations, areas and anything else we don't model.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct RawNode {
    pub id: u64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub tags: Tags,
}

impl RawNode {
    pub fn position(&self) -> RawPosition {
        RawPosition {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RawWay {
    pub id: u64,
    #[serde(default)]
    pub nodes: Vec<u64>,
    /// Inlined member positions from `out geom`. Clipped members come through as `null`.
    #[serde(default)]
    pub geometry: Option<Vec<Option<RawPosition>>>,
    #[serde(default)]
    pub tags: Tags,
}

impl RawElement {
    /// Never fails: an element that doesn't fit the model is treated as [`RawElement::Other`].
    pub fn parse(value: &Value) -> Self {
        match Self::deserialize(value) {
            Ok(element) => element,
            Err(err) => {
                debug!("Skipping malformed element: {err}");
                Self::Other
            }
        }
    }
}
