pub mod array;
pub mod decoder;
pub mod target;

pub use array::{DataArray, DataObject, Dataset, DatasetSlice, DimSel};
pub use decoder::{Coord, CoordDecoder, Decoder};
pub use target::{ArtistId, FigureId, LineStyle, RenderTarget, TraceLog, TraceOp, TraceTarget};
