//! Labeled N-dimensional arrays.
//!
//! A [`DataArray`] is a dense row-major array with named dimensions,
//! optional per-dimension coordinates and string attributes. Arrays keep a
//! back-reference to the [`Dataset`] they were sliced from together with
//! the selection that produced them, so a plotter can re-slice the same
//! variable with new dimension values during a replot.
//!
//! # Invariants
//!
//! 1. `dims.len() == shape.len()` and `values.len() == shape.iter().product()`.
//! 2. A coordinate registered for a dimension has exactly that dimension's
//!    length.
//! 3. `selection` only names dimensions of the base variable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single selection along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DimSel {
    /// Select by integer position.
    Index(usize),
    /// Select by coordinate value with nearest-neighbour fallback.
    Nearest(f64),
}

/// Error raised by array construction and selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayError(pub String);

impl fmt::Display for ArrayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ArrayError {}

/// A dense labeled array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataArray {
    name: String,
    dims: Vec<String>,
    shape: Vec<usize>,
    values: Vec<f64>,
    /// Coordinate values per dimension name. Sparse: dimensions without
    /// coordinates fall back to their integer positions.
    coords: BTreeMap<String, Vec<f64>>,
    /// String-keyed metadata (long name, units, ...).
    pub attrs: BTreeMap<String, String>,
    /// Dataset this array was sliced from, if any.
    #[serde(skip)]
    base: Option<Arc<Dataset>>,
    /// The selection that produced this array from the base variable.
    selection: BTreeMap<String, DimSel>,
}

impl DataArray {
    /// Create a new array. `values` must have exactly
    /// `shape.iter().product()` elements.
    pub fn new(
        name: impl Into<String>,
        dims: Vec<String>,
        shape: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, ArrayError> {
        if dims.len() != shape.len() {
            return Err(ArrayError(format!(
                "{} dimension names for a shape of rank {}",
                dims.len(),
                shape.len()
            )));
        }
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(ArrayError(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                values.len()
            )));
        }
        Ok(Self {
            name: name.into(),
            dims,
            shape,
            values,
            coords: BTreeMap::new(),
            attrs: BTreeMap::new(),
            base: None,
            selection: BTreeMap::new(),
        })
    }

    /// Convenience constructor for a one-dimensional array.
    pub fn vector(name: impl Into<String>, dim: impl Into<String>, values: Vec<f64>) -> Self {
        let len = values.len();
        // new() cannot fail for rank 1 with matching length
        Self::new(name, vec![dim.into()], vec![len], values).unwrap()
    }

    /// Register coordinate values for a dimension.
    pub fn with_coord(
        mut self,
        dim: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, ArrayError> {
        let dim = dim.into();
        let Some(pos) = self.dim_position(&dim) else {
            return Err(ArrayError(format!("no dimension named {dim:?}")));
        };
        if values.len() != self.shape[pos] {
            return Err(ArrayError(format!(
                "coordinate for {dim:?} has {} values, dimension has length {}",
                values.len(),
                self.shape[pos]
            )));
        }
        self.coords.insert(dim, values);
        Ok(self)
    }

    /// Set an attribute, builder style.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Coordinate values of a dimension, if registered.
    pub fn coord(&self, dim: &str) -> Option<&[f64]> {
        self.coords.get(dim).map(|v| v.as_slice())
    }

    /// The dataset this array was sliced from.
    pub fn base(&self) -> Option<&Arc<Dataset>> {
        self.base.as_ref()
    }

    /// The selection that produced this array from its base variable.
    pub fn selection(&self) -> &BTreeMap<String, DimSel> {
        &self.selection
    }

    fn dim_position(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// Select a single position along `dim`, dropping that dimension.
    pub fn isel(&self, dim: &str, index: usize) -> Result<Self, ArrayError> {
        let Some(axis) = self.dim_position(dim) else {
            return Err(ArrayError(format!("no dimension named {dim:?}")));
        };
        if index >= self.shape[axis] {
            return Err(ArrayError(format!(
                "index {index} out of bounds for dimension {dim:?} of length {}",
                self.shape[axis]
            )));
        }
        // Row-major strides
        let mut strides = vec![1usize; self.shape.len()];
        for i in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.shape[i + 1];
        }
        let out_shape: Vec<usize> = self
            .shape
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != axis)
            .map(|(_, &n)| n)
            .collect();
        let out_len: usize = out_shape.iter().product::<usize>().max(1);
        let mut out = Vec::with_capacity(out_len);
        let mut idx = vec![0usize; out_shape.len()];
        for _ in 0..out_len {
            let mut flat = index * strides[axis];
            let mut j = 0;
            for (i, stride) in strides.iter().enumerate() {
                if i == axis {
                    continue;
                }
                flat += idx[j] * stride;
                j += 1;
            }
            out.push(self.values[flat]);
            // increment the multi-index
            for j in (0..idx.len()).rev() {
                idx[j] += 1;
                if idx[j] < out_shape[j] {
                    break;
                }
                idx[j] = 0;
            }
        }
        let mut dims = self.dims.clone();
        dims.remove(axis);
        let mut result = Self::new(self.name.clone(), dims, out_shape, out)?;
        result.attrs = self.attrs.clone();
        result.coords = self
            .coords
            .iter()
            .filter(|(d, _)| d.as_str() != dim)
            .map(|(d, v)| (d.clone(), v.clone()))
            .collect();
        // record the scalar coordinate of the dropped dimension
        if let Some(coord) = self.coords.get(dim) {
            result.attrs.insert(dim.to_string(), coord[index].to_string());
        }
        result.base = self.base.clone();
        result.selection = self.selection.clone();
        result.selection.insert(dim.to_string(), DimSel::Index(index));
        Ok(result)
    }

    /// Select along `dim` by coordinate value, taking the nearest neighbour.
    /// Falls back to the integer positions when no coordinate is registered.
    pub fn sel(&self, dim: &str, value: f64) -> Result<Self, ArrayError> {
        let Some(axis) = self.dim_position(dim) else {
            return Err(ArrayError(format!("no dimension named {dim:?}")));
        };
        let index = match self.coords.get(dim) {
            Some(coord) => nearest_index(coord, value),
            None => nearest_index(
                &(0..self.shape[axis]).map(|i| i as f64).collect::<Vec<_>>(),
                value,
            ),
        };
        let mut result = self.isel(dim, index)?;
        result.selection.insert(dim.to_string(), DimSel::Nearest(value));
        Ok(result)
    }

    /// Apply a selection map, one dimension after the other.
    pub fn select(&self, sels: &BTreeMap<String, DimSel>) -> Result<Self, ArrayError> {
        let mut current = self.clone();
        for (dim, sel) in sels {
            current = match sel {
                DimSel::Index(i) => current.isel(dim, *i)?,
                DimSel::Nearest(v) => current.sel(dim, *v)?,
            };
        }
        Ok(current)
    }

    /// Re-slice this array from its base variable, merging `new_sels` over
    /// the recorded selection. Without a base, applies `new_sels` to the
    /// array itself.
    pub fn reselect(&self, new_sels: &BTreeMap<String, DimSel>) -> Result<Self, ArrayError> {
        match &self.base {
            Some(base) => {
                let mut sels = self.selection.clone();
                for (dim, sel) in new_sels {
                    sels.insert(dim.clone(), *sel);
                }
                base.slice(&self.name, &sels)
            }
            None => self.select(new_sels),
        }
    }
}

fn nearest_index(coord: &[f64], value: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &c) in coord.iter().enumerate() {
        let dist = (c - value).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// A named collection of variables, the "base" object arrays are sliced
/// from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    arrays: BTreeMap<String, DataArray>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arrays: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, array: DataArray) {
        self.arrays.insert(array.name.clone(), array);
    }

    pub fn get(&self, name: &str) -> Option<&DataArray> {
        self.arrays.get(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.arrays.keys().map(|s| s.as_str())
    }
}

/// Slicing entry point that wires the base back-reference. Implemented on
/// `Arc<Dataset>` so the produced array can keep the dataset alive.
pub trait DatasetSlice {
    fn slice(&self, variable: &str, sels: &BTreeMap<String, DimSel>)
        -> Result<DataArray, ArrayError>;
}

impl DatasetSlice for Arc<Dataset> {
    fn slice(
        &self,
        variable: &str,
        sels: &BTreeMap<String, DimSel>,
    ) -> Result<DataArray, ArrayError> {
        let Some(full) = self.get(variable) else {
            return Err(ArrayError(format!(
                "dataset {:?} has no variable {variable:?}",
                self.name
            )));
        };
        let mut arr = full.select(sels)?;
        arr.base = Some(Arc::clone(self));
        arr.selection = sels.clone();
        Ok(arr)
    }
}

/// The data a plotter visualizes: a single array or an ordered,
/// homogeneous list of arrays. Operations on a list fan out to every
/// element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataObject {
    Array(DataArray),
    List(Vec<DataArray>),
}

impl DataObject {
    /// Number of contained arrays (1 for a single array).
    pub fn len(&self) -> usize {
        match self {
            DataObject::Array(_) => 1,
            DataObject::List(arrs) => arrs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_list(&self) -> bool {
        matches!(self, DataObject::List(_))
    }

    /// The first contained array.
    pub fn first(&self) -> Option<&DataArray> {
        match self {
            DataObject::Array(arr) => Some(arr),
            DataObject::List(arrs) => arrs.first(),
        }
    }

    /// Array at `index` (0 for a single array).
    pub fn get(&self, index: usize) -> Option<&DataArray> {
        match self {
            DataObject::Array(arr) if index == 0 => Some(arr),
            DataObject::Array(_) => None,
            DataObject::List(arrs) => arrs.get(index),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataArray> {
        match self {
            DataObject::Array(arr) => std::slice::from_ref(arr).iter(),
            DataObject::List(arrs) => arrs.iter(),
        }
    }

    /// Re-slice every contained array from its base (see
    /// [`DataArray::reselect`]).
    pub fn reselect(&self, sels: &BTreeMap<String, DimSel>) -> Result<Self, ArrayError> {
        match self {
            DataObject::Array(arr) => Ok(DataObject::Array(arr.reselect(sels)?)),
            DataObject::List(arrs) => Ok(DataObject::List(
                arrs.iter()
                    .map(|a| a.reselect(sels))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
}

impl From<DataArray> for DataObject {
    fn from(arr: DataArray) -> Self {
        DataObject::Array(arr)
    }
}
