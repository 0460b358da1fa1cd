//! Gradient-aware marching cubes on a narrow-band unsigned field.
//!
//! An unsigned field has no inside. Signs are recovered from the refined
//! gradients by flooding the band (see [`infer_signs`]), after which the
//! band cells are triangulated with the classic lookup tables.

mod marching;
mod sign;
mod tables;

pub use marching::{ExtractStats, Isosurface, extract_isosurface, processed_cells};
pub use sign::{SignField, infer_signs};
