//! The PVP palette file: a `PVPL` header followed by raw palette entries in
//! one of the hardware palette formats.
use binrw::{BinRead, BinWrite};

use crate::color::PaletteFormat;

/// Raw palette entries, kept at their stored width so files round-trip
/// without requantisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaletteEntries {
    Texel16(Vec<u16>),
    Argb8888(Vec<u32>),
}

impl PaletteEntries {
    pub fn len(&self) -> usize {
        match self {
            PaletteEntries::Texel16(v) => v.len(),
            PaletteEntries::Argb8888(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn raw(&self, index: usize) -> u32 {
        match self {
            PaletteEntries::Texel16(v) => v[index] as u32,
            PaletteEntries::Argb8888(v) => v[index],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pvp {
    pub format: PaletteFormat,
    pub entries: PaletteEntries,
}

impl Pvp {
    /// Expands every entry to 8-bit `(a, r, g, b)`.
    pub fn to_rgba(&self, opaque_alpha: u8) -> Vec<[u8; 4]> {
        (0..self.entries.len())
            .map(|i| {
                let (a, r, g, b) = self.format.unpack_entry(self.entries.raw(i), opaque_alpha);
                [a, r, g, b]
            })
            .collect()
    }

    /// Quantises 8-bit `(a, r, g, b)` entries into a palette file.
    pub fn from_rgba(format: PaletteFormat, entries: &[[u8; 4]]) -> Self {
        let entries = match format {
            PaletteFormat::Argb8888 => PaletteEntries::Argb8888(
                entries
                    .iter()
                    .map(|e| format.pack_entry(e[0], e[1], e[2], e[3]))
                    .collect(),
            ),
            _ => PaletteEntries::Texel16(
                entries
                    .iter()
                    .map(|e| format.pack_entry(e[0], e[1], e[2], e[3]) as u16)
                    .collect(),
            ),
        };
        Self { format, entries }
    }
}

impl BinRead for Pvp {
    type Args<'a> = ();

    fn read_options<R: std::io::Read + std::io::Seek>(
        reader: &mut R,
        endian: binrw::Endian,
        args: Self::Args<'_>,
    ) -> binrw::BinResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != b"PVPL" {
            return Err(binrw::Error::BadMagic {
                pos: reader.stream_position()?.saturating_sub(4),
                found: Box::new(magic),
            });
        }

        let _data_size = u32::read_options(reader, endian, args)?;
        let format = PaletteFormat::read_options(reader, endian, args)?;
        let _reserved = u16::read_options(reader, endian, args)?;
        let entry_count = u16::read_options(reader, endian, args)?;

        let entries = match format {
            PaletteFormat::Argb8888 => {
                let mut entries = Vec::with_capacity(entry_count as usize);
                for _ in 0..entry_count {
                    entries.push(u32::read_options(reader, endian, args)?);
                }
                PaletteEntries::Argb8888(entries)
            }
            _ => {
                let mut entries = Vec::with_capacity(entry_count as usize);
                for _ in 0..entry_count {
                    entries.push(u16::read_options(reader, endian, args)?);
                }
                PaletteEntries::Texel16(entries)
            }
        };

        Ok(Pvp { format, entries })
    }
}

impl BinWrite for Pvp {
    type Args<'a> = ();

    fn write_options<W: std::io::Write + std::io::Seek>(
        &self,
        writer: &mut W,
        endian: binrw::Endian,
        args: Self::Args<'_>,
    ) -> binrw::BinResult<()> {
        writer.write_all(b"PVPL")?;
        let data_size = self.entries.len() * self.format.entry_size() + 8;
        (data_size as u32).write_options(writer, endian, args)?;
        self.format.write_options(writer, endian, args)?;
        0u16.write_options(writer, endian, args)?;
        (self.entries.len() as u16).write_options(writer, endian, args)?;
        match &self.entries {
            PaletteEntries::Texel16(entries) => {
                for entry in entries {
                    entry.write_options(writer, endian, args)?;
                }
            }
            PaletteEntries::Argb8888(entries) => {
                for entry in entries {
                    entry.write_options(writer, endian, args)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_round_trips() {
        let pvp = Pvp::from_rgba(
            PaletteFormat::Argb8888,
            &[[0xFF, 1, 2, 3], [0x80, 4, 5, 6]],
        );
        let bytes = pvp.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"PVPL");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 16);
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), 6);
        assert_eq!(u16::from_le_bytes(bytes[14..16].try_into().unwrap()), 2);

        let back = Pvp::from_bytes(&bytes).unwrap();
        assert_eq!(back, pvp);
        assert_eq!(back.to_rgba(0xFF)[0], [0xFF, 1, 2, 3]);
    }

    #[test]
    fn texel16_palette_quantises() {
        let pvp = Pvp::from_rgba(PaletteFormat::Rgb565, &[[0xFF, 0xFF, 0xFF, 0xFF]]);
        let bytes = pvp.to_bytes().unwrap();
        // One 16-bit entry after the 16 byte header.
        assert_eq!(bytes.len(), 18);
        assert_eq!(Pvp::from_bytes(&bytes).unwrap().to_rgba(0xAA)[0], [0xAA, 0xFF, 0xFF, 0xFF]);
    }
}
