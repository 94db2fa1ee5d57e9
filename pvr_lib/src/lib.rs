//! Reading, writing and compression of Dreamcast PowerVR (CLX2) textures.
//!
//! The on-disk containers are [`pvr::Pvr`], the legacy [`vqf::Vqf`] and the
//! [`pvp::Pvp`] palette file. Vector quantised payloads are produced by the
//! [`vq`] module. Texel level packing lives in [`color`] and the tiled
//! address calculation in [`twiddle`].
use std::{
    io::{BufWriter, Cursor, Read, Seek, Write},
    path::Path,
};

use binrw::{BinReaderExt, BinWriterExt};

pub mod color;
pub mod error;
pub mod pvp;
pub mod pvr;
pub mod twiddle;
pub mod vq;
pub mod vqf;

macro_rules! file_read_write_impl {
    ($($type_name:path),*) => {
        $(
            impl $type_name {
                pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, error::ReadError> {
                    reader.read_le().map_err(Into::into)
                }

                pub fn from_bytes(bytes: &[u8]) -> Result<Self, error::ReadError> {
                    Self::read(&mut Cursor::new(bytes))
                }

                pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, error::ReadError> {
                    let mut reader = Cursor::new(std::fs::read(path)?);
                    reader.read_le().map_err(Into::into)
                }

                pub fn write<W: Write + Seek>(&self, writer: &mut W) -> Result<(), error::WriteError> {
                    writer.write_le(self).map_err(Into::into)
                }

                pub fn to_bytes(&self) -> Result<Vec<u8>, error::WriteError> {
                    let mut writer = Cursor::new(Vec::new());
                    self.write(&mut writer)?;
                    Ok(writer.into_inner())
                }

                pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), error::WriteError> {
                    let mut writer = BufWriter::new(std::fs::File::create(path)?);
                    writer.write_le(self).map_err(Into::into)
                }
            }
        )*
    };
}

file_read_write_impl!(pvr::Pvr, vqf::Vqf, pvp::Pvp);
