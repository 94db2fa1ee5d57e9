//! Mipmapped RGBA raster images and their conversions to and from the
//! PowerVR container formats.
//!
//! [Raster] is the working representation: row-major RGB levels with
//! optional alpha and palette index planes. [decode] turns PVR/VQF
//! containers into rasters, [encode] goes the other way (including VQ
//! compression via `pvr_lib::vq`).
pub mod decode;
pub mod encode;
mod raster;

pub use decode::{decode_pvr, decode_vqf, DecodeError, DecodeOptions};
pub use encode::{encode_pvr, encode_vq, encode_vqf, EncodeError, SaveOptions};
pub use raster::{Palette, Raster};
