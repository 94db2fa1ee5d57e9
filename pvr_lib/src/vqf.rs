//! The legacy VQF texture container: a fixed 12 byte header followed by the
//! codebook and index stream.
use binrw::{BinRead, BinWrite};

use crate::color::PixelFormat;

const MAPTYPE_555: u8 = 6;
const MAPTYPE_565: u8 = 7;
const MAPTYPE_1555: u8 = 8;
const MAPTYPE_4444: u8 = 9;
const MAPTYPE_YUV422: u8 = 10;
const MAPTYPE_MIPMAPPED: u8 = 64;

/// Texture width encoded by a VQF size code.
pub fn width_for_size_code(code: u8) -> Option<u32> {
    match code {
        0 => Some(32),
        1 => Some(64),
        2 => Some(128),
        3 => Some(256),
        4 => Some(8),
        5 => Some(16),
        6 => Some(512),
        7 => Some(1024),
        _ => None,
    }
}

pub fn size_code_for_width(width: u32) -> Option<u8> {
    match width {
        32 => Some(0),
        64 => Some(1),
        128 => Some(2),
        256 => Some(3),
        8 => Some(4),
        16 => Some(5),
        512 => Some(6),
        1024 => Some(7),
        _ => None,
    }
}

pub fn codebook_len_for_code(code: u8) -> Option<usize> {
    match code {
        0 => Some(8),
        1 => Some(16),
        2 => Some(32),
        3 => Some(64),
        4 => Some(128),
        5 => Some(256),
        _ => None,
    }
}

pub fn code_for_codebook_len(len: usize) -> Option<u8> {
    match len {
        8 => Some(0),
        16 => Some(1),
        32 => Some(2),
        64 => Some(3),
        128 => Some(4),
        256 => Some(5),
        _ => None,
    }
}

/// A VQF file. The payload layout matches the PVR VQ classes: codebook
/// entries of four twiddled texels, then one index byte per 2x2 block,
/// coarsest mipmap first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vqf {
    pub format: PixelFormat,
    pub mipmapped: bool,
    pub width: u32,
    pub codebook_len: usize,
    pub data: Vec<u8>,
}

fn bad_field<T>(pos: u64, message: &'static str) -> binrw::BinResult<T> {
    Err(binrw::Error::AssertFail {
        pos,
        message: message.to_string(),
    })
}

impl BinRead for Vqf {
    type Args<'a> = ();

    fn read_options<R: std::io::Read + std::io::Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> binrw::BinResult<Self> {
        let mut header = [0u8; 12];
        reader.read_exact(&mut header)?;
        let pos = reader.stream_position()?;

        if &header[0..2] != b"PV" {
            return Err(binrw::Error::BadMagic {
                pos: pos.saturating_sub(12),
                found: Box::new([header[0], header[1]]),
            });
        }

        let format = match header[2] & 0x3F {
            MAPTYPE_555 => PixelFormat::Rgb555,
            MAPTYPE_565 => PixelFormat::Rgb565,
            MAPTYPE_1555 => PixelFormat::Argb1555,
            MAPTYPE_4444 => PixelFormat::Argb4444,
            MAPTYPE_YUV422 => PixelFormat::Yuv422,
            _ => return bad_field(pos, "unsupported VQF map type"),
        };
        let mipmapped = header[2] & MAPTYPE_MIPMAPPED != 0;

        let Some(width) = width_for_size_code(header[3]) else {
            return bad_field(pos, "unknown VQF texture size code");
        };
        let Some(codebook_len) = codebook_len_for_code(header[5]) else {
            return bad_field(pos, "unsupported VQF codebook size code");
        };

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        Ok(Vqf {
            format,
            mipmapped,
            width,
            codebook_len,
            data,
        })
    }
}

impl BinWrite for Vqf {
    type Args<'a> = ();

    fn write_options<W: std::io::Write + std::io::Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> binrw::BinResult<()> {
        let pos = writer.stream_position()?;

        let mut map_type = match self.format {
            PixelFormat::Rgb555 => MAPTYPE_555,
            PixelFormat::Rgb565 => MAPTYPE_565,
            PixelFormat::Argb1555 => MAPTYPE_1555,
            PixelFormat::Argb4444 => MAPTYPE_4444,
            PixelFormat::Yuv422 => MAPTYPE_YUV422,
            _ => return bad_field(pos, "pixel format not expressible in VQF"),
        };
        if self.mipmapped {
            map_type |= MAPTYPE_MIPMAPPED;
        }

        let Some(size_code) = size_code_for_width(self.width) else {
            return bad_field(pos, "width has no VQF size code");
        };
        let Some(codebook_code) = code_for_codebook_len(self.codebook_len) else {
            return bad_field(pos, "codebook size has no VQF code");
        };

        let mut header = [0u8; 12];
        header[0] = b'P';
        header[1] = b'V';
        header[2] = map_type;
        header[3] = size_code;
        header[5] = codebook_code;
        writer.write_all(&header)?;
        writer.write_all(&self.data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_codes_are_inverse() {
        for width in [8u32, 16, 32, 64, 128, 256, 512, 1024] {
            let code = size_code_for_width(width).unwrap();
            assert_eq!(width_for_size_code(code), Some(width));
        }
        assert_eq!(size_code_for_width(96), None);
    }

    #[test]
    fn codebook_codes_are_inverse() {
        for len in [8usize, 16, 32, 64, 128, 256] {
            let code = code_for_codebook_len(len).unwrap();
            assert_eq!(codebook_len_for_code(code), Some(len));
        }
    }

    #[test]
    fn header_round_trips() {
        let vqf = Vqf {
            format: PixelFormat::Argb4444,
            mipmapped: true,
            width: 128,
            codebook_len: 256,
            data: vec![1, 2, 3, 4],
        };
        let bytes = vqf.to_bytes().unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..2], b"PV");
        assert_eq!(bytes[2], MAPTYPE_4444 | MAPTYPE_MIPMAPPED);
        assert_eq!(bytes[3], 2);
        assert_eq!(bytes[5], 5);

        assert_eq!(Vqf::from_bytes(&bytes).unwrap(), vqf);
    }
}
