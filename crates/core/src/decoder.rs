//! Coordinate decoding.
//!
//! A [`Decoder`] answers grid-topology questions about a data array:
//! which coordinate plays the role of the x, y, z or time axis, and
//! whether the grid is unstructured. Formatoptions whose drawing logic is
//! topology-aware go through this interface instead of guessing dimension
//! names themselves.

use crate::array::DataArray;
use std::collections::{BTreeMap, BTreeSet};

/// A coordinate variable extracted from a data array.
#[derive(Debug, Clone, PartialEq)]
pub struct Coord {
    pub name: String,
    pub values: Vec<f64>,
    pub attrs: BTreeMap<String, String>,
}

impl Coord {
    fn from_dim(arr: &DataArray, dim: &str) -> Option<Self> {
        let pos = arr.dims().iter().position(|d| d == dim)?;
        let values = match arr.coord(dim) {
            Some(vals) => vals.to_vec(),
            None => (0..arr.shape()[pos]).map(|i| i as f64).collect(),
        };
        Some(Self {
            name: dim.to_string(),
            values,
            attrs: BTreeMap::new(),
        })
    }
}

/// Decodes the axis roles of a data array.
pub trait Decoder: Send + Sync {
    /// The coordinate to use for the x axis, if any.
    fn get_x(&self, arr: &DataArray) -> Option<Coord>;
    /// The coordinate to use for the y axis, if any.
    fn get_y(&self, arr: &DataArray) -> Option<Coord>;
    /// The vertical coordinate, if any.
    fn get_z(&self, arr: &DataArray) -> Option<Coord>;
    /// The time coordinate, if any.
    fn get_t(&self, arr: &DataArray) -> Option<Coord>;

    /// True if the horizontal grid is unstructured (one shared cell
    /// dimension instead of an x/y product).
    fn is_unstructured(&self, _arr: &DataArray) -> bool {
        false
    }

    /// True if the unstructured grid is triangular.
    fn is_triangular(&self, _arr: &DataArray) -> bool {
        false
    }
}

/// Name-set based decoder.
///
/// A dimension is recognized as x/y/z/t when its name is in the
/// corresponding set. The x and y axes additionally fall back to the
/// last and second-to-last dimension, which matches the layout of
/// row-major gridded data.
#[derive(Debug, Clone)]
pub struct CoordDecoder {
    pub x_names: BTreeSet<String>,
    pub y_names: BTreeSet<String>,
    pub z_names: BTreeSet<String>,
    pub t_names: BTreeSet<String>,
}

impl Default for CoordDecoder {
    fn default() -> Self {
        Self {
            x_names: BTreeSet::new(),
            y_names: BTreeSet::new(),
            z_names: BTreeSet::new(),
            t_names: ["time".to_string()].into_iter().collect(),
        }
    }
}

impl CoordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn named_dim<'a>(&self, arr: &'a DataArray, names: &BTreeSet<String>) -> Option<&'a str> {
        arr.dims()
            .iter()
            .find(|d| names.contains(d.as_str()))
            .map(|s| s.as_str())
    }

    /// Positional fallback: `offset` counted from the last dimension, with
    /// time and z dimensions excluded from the candidates. A pure
    /// time/z array falls back to all dimensions, so a time series still
    /// gets an x axis.
    fn positional_dim<'a>(&self, arr: &'a DataArray, offset: usize) -> Option<&'a str> {
        let mut candidates: Vec<&str> = arr
            .dims()
            .iter()
            .map(|s| s.as_str())
            .filter(|d| !self.t_names.contains(*d) && !self.z_names.contains(*d))
            .collect();
        if candidates.is_empty() {
            candidates = arr.dims().iter().map(|s| s.as_str()).collect();
        }
        if offset >= candidates.len() {
            return None;
        }
        Some(candidates[candidates.len() - 1 - offset])
    }
}

impl Decoder for CoordDecoder {
    fn get_x(&self, arr: &DataArray) -> Option<Coord> {
        let dim = self
            .named_dim(arr, &self.x_names)
            .or_else(|| self.positional_dim(arr, 0))?;
        Coord::from_dim(arr, dim)
    }

    fn get_y(&self, arr: &DataArray) -> Option<Coord> {
        let dim = self
            .named_dim(arr, &self.y_names)
            .or_else(|| self.positional_dim(arr, 1))?;
        Coord::from_dim(arr, dim)
    }

    fn get_z(&self, arr: &DataArray) -> Option<Coord> {
        let dim = self.named_dim(arr, &self.z_names)?;
        Coord::from_dim(arr, dim)
    }

    fn get_t(&self, arr: &DataArray) -> Option<Coord> {
        let dim = self.named_dim(arr, &self.t_names)?;
        Coord::from_dim(arr, dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr() -> DataArray {
        DataArray::new(
            "v",
            vec!["time".into(), "lat".into(), "lon".into()],
            vec![2, 2, 2],
            vec![0.0; 8],
        )
        .unwrap()
        .with_coord("time", vec![10.0, 20.0])
        .unwrap()
        .with_coord("lon", vec![0.0, 180.0])
        .unwrap()
    }

    #[test]
    fn test_time_by_name() {
        let dec = CoordDecoder::new();
        let t = dec.get_t(&arr()).unwrap();
        assert_eq!(t.name, "time");
        assert_eq!(t.values, vec![10.0, 20.0]);
    }

    #[test]
    fn test_positional_x_y() {
        let dec = CoordDecoder::new();
        let a = arr();
        // time excluded from the positional candidates
        assert_eq!(dec.get_x(&a).unwrap().name, "lon");
        assert_eq!(dec.get_y(&a).unwrap().name, "lat");
    }

    #[test]
    fn test_name_sets_win_over_position() {
        let mut dec = CoordDecoder::new();
        dec.x_names.insert("lat".to_string());
        assert_eq!(dec.get_x(&arr()).unwrap().name, "lat");
    }

    #[test]
    fn test_missing_coord_uses_positions() {
        let dec = CoordDecoder::new();
        let y = dec.get_y(&arr()).unwrap();
        // lat has no registered coordinate
        assert_eq!(y.values, vec![0.0, 1.0]);
    }

    #[test]
    fn test_no_z_without_names() {
        let dec = CoordDecoder::new();
        assert!(dec.get_z(&arr()).is_none());
    }
}
