//! Overpass JSON to GeoJSON.
//!
//! Conversion is lenient per element: points without coordinates, ways that
//! resolve to fewer than two positions and element kinds we don't model
//! (relations) are dropped, never reported as errors. The only hard failure
//! is a payload with no `elements` list.

use std::collections::HashMap;

use geo::{Coord, LineString};
use geojson::{feature::Id, Feature, FeatureCollection, Geometry, JsonObject, Position};
use log::{debug, info};
use serde_json::Value;
use thiserror::Error;

use crate::osm::{OsmId, RawElement, RawNode, RawPosition, RawWay, Tags};

/// Presence of any of these keys on a closed way makes it an area, whatever the value.
const AREA_KEYS: [&str; 5] = ["building", "landuse", "natural", "leisure", "amenity"];

/// Smallest closed ring: a triangle plus the repeated first vertex.
const MIN_RING_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Invalid Overpass API response: missing 'elements'")]
    MissingElements,
    #[error("Failed to parse Overpass API response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Node id to position, for resolving way members.
#[derive(Debug, Default)]
pub struct NodeIndex(HashMap<u64, RawPosition>);

impl NodeIndex {
    /// Later duplicates of an id overwrite earlier ones.
    pub fn build(elements: &[RawElement]) -> Self {
        let mut nodes = HashMap::new();
        for element in elements {
            if let RawElement::Node(node) = element {
                nodes.insert(node.id, node.position());
            }
        }
        Self(nodes)
    }

    /// `None` for unknown ids and for nodes missing a coordinate.
    pub fn get(&self, id: u64) -> Option<Coord> {
        self.0.get(&id)?.coord()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn convert_node(node: &RawNode) -> Option<Feature> {
    let Some(coord) = node.position().coord() else {
        debug!("Skipping node/{}: missing coordinates", node.id);
        return None;
    };

    Some(feature(
        OsmId::Node(node.id),
        geojson::Value::Point(position(coord)),
        &node.tags,
    ))
}

pub fn convert_way(way: &RawWay, index: &NodeIndex) -> Option<Feature> {
    // inlined geometry wins over member lookup, even when it's unusable
    let coords: Vec<Coord> = match &way.geometry {
        Some(geometry) => geometry
            .iter()
            .flatten()
            .filter_map(RawPosition::coord)
            .collect(),
        None => way.nodes.iter().filter_map(|id| index.get(*id)).collect(),
    };

    if coords.len() < 2 {
        debug!(
            "Skipping way/{}: {} resolvable positions",
            way.id,
            coords.len()
        );
        return None;
    }

    let line = LineString::new(coords);
    let positions: Vec<Position> = line.coords().map(|x| position(*x)).collect();
    let value = if is_closed(&line) && is_area(&way.tags) {
        geojson::Value::Polygon(vec![positions])
    } else {
        geojson::Value::LineString(positions)
    };

    Some(feature(OsmId::Way(way.id), value, &way.tags))
}

/// Runs the conversion over a parsed Overpass response.
pub fn convert(payload: &Value) -> Result<FeatureCollection, ConvertError> {
    let elements: Vec<RawElement> = payload
        .get("elements")
        .and_then(Value::as_array)
        .ok_or(ConvertError::MissingElements)?
        .iter()
        .map(RawElement::parse)
        .collect();

    Ok(convert_elements(&elements))
}

pub fn convert_str(text: &str) -> Result<FeatureCollection, ConvertError> {
    let payload: Value = serde_json::from_str(text)?;
    convert(&payload)
}

pub fn convert_elements(elements: &[RawElement]) -> FeatureCollection {
    let index = NodeIndex::build(elements);

    let features: Vec<Feature> = elements
        .iter()
        .filter_map(|element| match element {
            RawElement::Node(node) => convert_node(node),
            RawElement::Way(way) => convert_way(way, &index),
            RawElement::Other => None,
        })
        .collect();

    info!(
        "Converted {} elements ({} indexed nodes) into {} features",
        elements.len(),
        index.len(),
        features.len()
    );

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Compact GeoJSON text, non-ASCII left as UTF-8.
pub fn to_geojson_string(collection: &FeatureCollection) -> serde_json::Result<String> {
    serde_json::to_string(collection)
}

fn is_closed(line: &LineString) -> bool {
    line.0.len() >= MIN_RING_LEN && line.is_closed()
}

fn is_area(tags: &Tags) -> bool {
    tags.get("area").is_some_and(|x| x == "yes")
        || AREA_KEYS.iter().any(|key| tags.contains_key(*key))
}

fn position(coord: Coord) -> Position {
    vec![coord.x, coord.y]
}

fn feature(id: OsmId, value: geojson::Value, tags: &Tags) -> Feature {
    let properties: JsonObject = tags
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: Some(Id::String(id.to_string())),
        properties: Some(properties),
        foreign_members: None,
    }
}
