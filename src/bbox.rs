use core::fmt;
use std::str::FromStr;

use anyhow::{bail, Context};
use itertools::Itertools;

/// WGS84 extent, stored longitude-first like the GeoJSON we produce.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BBox {
    /// `south,west,north,east`: the latitude-first order of Overpass bbox filters.
    pub fn overpass(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Parses `min_lon,min_lat,max_lon,max_lat`.
impl FromStr for BBox {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min_lon, min_lat, max_lon, max_lat) = s
            .split(',')
            .map(|x| x.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid bbox: {s}"))?
            .into_iter()
            .collect_tuple()
            .context("bbox needs four numbers: min_lon,min_lat,max_lon,max_lat")?;

        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            bail!("bbox longitude out of range: {s}");
        }
        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            bail!("bbox latitude out of range: {s}");
        }
        // min_lon > max_lon is a view across the antimeridian
        if min_lat > max_lat {
            bail!("bbox south edge is north of the north edge: {s}");
        }

        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }
}
