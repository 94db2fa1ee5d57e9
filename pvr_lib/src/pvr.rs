//! The PVR texture container: an optional `GBIX` chunk, the `PVRT` header
//! and the raw texture payload.
//!
//! The texture type word encodes the pixel format in its low byte and the
//! storage class in the next; [Pvr] keeps the payload exactly as stored and
//! leaves texel interpretation to the decode layer.
use std::io::SeekFrom;

use binrw::{BinRead, BinWrite};

use crate::color::PixelFormat;

/// Highest global index available to applications; everything above is
/// reserved for the host OS.
pub const MAX_GBIX: u32 = 0xFFFF_FFEF;

/// Storage class byte of the texture type word.
#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(repr(u8))]
pub enum TextureType {
    Twiddled = 0x01,
    TwiddledMipmap = 0x02,
    Vq = 0x03,
    VqMipmap = 0x04,
    Palette4 = 0x05,
    Palette4Mipmap = 0x06,
    Palette8 = 0x07,
    Palette8Mipmap = 0x08,
    Rectangle = 0x09,
    /// Reserved by the hardware; accepted on read only when square.
    RectangleMipmap = 0x0A,
    Stride = 0x0B,
    /// Reserved by the hardware.
    StrideMipmap = 0x0C,
    TwiddledRectangle = 0x0D,
    /// Input only; converted to twiddled on hardware upload.
    Bmp = 0x0E,
    BmpMipmap = 0x0F,
    SmallVq = 0x10,
    SmallVqMipmap = 0x11,
}

impl TextureType {
    pub fn is_mipmapped(&self) -> bool {
        matches!(
            self,
            TextureType::TwiddledMipmap
                | TextureType::VqMipmap
                | TextureType::Palette4Mipmap
                | TextureType::Palette8Mipmap
                | TextureType::RectangleMipmap
                | TextureType::StrideMipmap
                | TextureType::BmpMipmap
                | TextureType::SmallVqMipmap
        )
    }

    pub fn is_vq(&self) -> bool {
        matches!(
            self,
            TextureType::Vq
                | TextureType::VqMipmap
                | TextureType::SmallVq
                | TextureType::SmallVqMipmap
        )
    }

    /// VQ payloads are always twiddled; plain textures only in the twiddled
    /// and palette classes.
    pub fn is_twiddled(&self) -> bool {
        matches!(
            self,
            TextureType::Twiddled
                | TextureType::TwiddledMipmap
                | TextureType::TwiddledRectangle
                | TextureType::Palette4
                | TextureType::Palette4Mipmap
                | TextureType::Palette8
                | TextureType::Palette8Mipmap
        ) || self.is_vq()
    }

    pub fn palette_depth(&self) -> Option<u32> {
        match self {
            TextureType::Palette4 | TextureType::Palette4Mipmap => Some(4),
            TextureType::Palette8 | TextureType::Palette8Mipmap => Some(8),
            _ => None,
        }
    }

    /// Codebook entries stored by a VQ texture of this class and width.
    pub fn codebook_len(&self, width: u16) -> Option<usize> {
        match self {
            TextureType::Vq | TextureType::VqMipmap => Some(256),
            TextureType::SmallVq => Some(match width {
                0..=16 => 16,
                32 => 32,
                64 => 128,
                _ => 256,
            }),
            TextureType::SmallVqMipmap => Some(match width {
                0..=16 => 16,
                32 => 64,
                _ => 256,
            }),
            _ => None,
        }
    }
}

/// The smallest VQ storage class able to hold `codebook_len` codes at this
/// width, preferring SmallVQ when the codebook fits.
pub fn vq_texture_type(width: u16, mipmapped: bool, codebook_len: usize) -> TextureType {
    let small = if mipmapped {
        TextureType::SmallVqMipmap
    } else {
        TextureType::SmallVq
    };
    match small.codebook_len(width) {
        Some(limit) if codebook_len <= limit && limit < 256 => small,
        _ => {
            if mipmapped {
                TextureType::VqMipmap
            } else {
                TextureType::Vq
            }
        }
    }
}

/// A PVR texture file.
///
/// `data` is the payload following the header: for VQ classes the codebook
/// then the index stream, otherwise texels or palette indices, mipmaps
/// coarsest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pvr {
    /// Value of the optional GBIX chunk.
    pub global_index: Option<u32>,
    pub pixel_format: PixelFormat,
    pub texture_type: TextureType,
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

impl BinRead for Pvr {
    type Args<'a> = ();

    fn read_options<R: std::io::Read + std::io::Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        args: Self::Args<'_>,
    ) -> binrw::BinResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;

        let global_index = if &magic == b"GBIX" {
            let offset_to_next = u32::read_options(reader, endian, args)?;
            let index = u32::read_options(reader, endian, args)?;
            // The chunk is padded out to the declared offset.
            reader.seek(SeekFrom::Current(offset_to_next.saturating_sub(4) as i64))?;
            reader.read_exact(&mut magic)?;
            Some(index)
        } else {
            None
        };

        if &magic != b"PVRT" {
            return Err(binrw::Error::BadMagic {
                pos: reader.stream_position()?.saturating_sub(4),
                found: Box::new(magic),
            });
        }

        let data_size = u32::read_options(reader, endian, args)?;
        let pixel_format = PixelFormat::read_options(reader, endian, args)?;
        let texture_type = TextureType::read_options(reader, endian, args)?;
        reader.seek(SeekFrom::Current(2))?;
        let width = u16::read_options(reader, endian, args)?;
        let height = u16::read_options(reader, endian, args)?;

        // The size field counts the payload plus the 8 header bytes after
        // itself.
        let payload = (data_size as usize).saturating_sub(8);
        let mut data = vec![0u8; payload];
        reader.read_exact(&mut data)?;

        Ok(Pvr {
            global_index,
            pixel_format,
            texture_type,
            width,
            height,
            data,
        })
    }
}

impl BinWrite for Pvr {
    type Args<'a> = ();

    fn write_options<W: std::io::Write + std::io::Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        args: Self::Args<'_>,
    ) -> binrw::BinResult<()> {
        if let Some(index) = self.global_index {
            writer.write_all(b"GBIX")?;
            8u32.write_options(writer, endian, args)?;
            index.write_options(writer, endian, args)?;
            0u32.write_options(writer, endian, args)?;
        }

        writer.write_all(b"PVRT")?;
        (self.data.len() as u32 + 8).write_options(writer, endian, args)?;
        self.pixel_format.write_options(writer, endian, args)?;
        self.texture_type.write_options(writer, endian, args)?;
        0u16.write_options(writer, endian, args)?;
        self.width.write_options(writer, endian, args)?;
        self.height.write_options(writer, endian, args)?;
        writer.write_all(&self.data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Pvr {
        Pvr {
            global_index: None,
            pixel_format: PixelFormat::Rgb565,
            texture_type: TextureType::Twiddled,
            width: 8,
            height: 8,
            data: vec![0xAB; 128],
        }
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"PVRT");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 136);
        // Pixel format, texture type, two reserved bytes.
        assert_eq!(&bytes[8..12], &[0x01, 0x01, 0x00, 0x00]);
        assert_eq!(u16::from_le_bytes(bytes[12..14].try_into().unwrap()), 8);
        assert_eq!(bytes.len(), 16 + 128);
    }

    #[test]
    fn gbix_chunk_round_trips() {
        let mut pvr = sample();
        pvr.global_index = Some(1234);
        let bytes = pvr.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"GBIX");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 8);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 1234);
        assert_eq!(&bytes[16..20], b"PVRT");

        let back = Pvr::from_bytes(&bytes).unwrap();
        assert_eq!(back, pvr);
    }

    #[test]
    fn truncated_payload_is_reported() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(
            Pvr::from_bytes(&bytes),
            Err(crate::error::ReadError::Truncated)
        ));
    }

    #[test]
    fn small_vq_codebook_sizes() {
        assert_eq!(TextureType::SmallVq.codebook_len(16), Some(16));
        assert_eq!(TextureType::SmallVq.codebook_len(32), Some(32));
        assert_eq!(TextureType::SmallVq.codebook_len(64), Some(128));
        assert_eq!(TextureType::SmallVqMipmap.codebook_len(32), Some(64));
        assert_eq!(TextureType::SmallVqMipmap.codebook_len(64), Some(256));
        assert_eq!(TextureType::Vq.codebook_len(128), Some(256));
        assert_eq!(TextureType::Twiddled.codebook_len(128), None);
    }

    #[test]
    fn vq_class_selection() {
        assert_eq!(vq_texture_type(16, false, 16), TextureType::SmallVq);
        assert_eq!(vq_texture_type(32, true, 64), TextureType::SmallVqMipmap);
        assert_eq!(vq_texture_type(32, true, 128), TextureType::VqMipmap);
        assert_eq!(vq_texture_type(128, false, 256), TextureType::Vq);
    }
}
