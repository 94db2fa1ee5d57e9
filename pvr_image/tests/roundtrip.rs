//! End to end container round trips.
use pvr_image::{
    decode_pvr, decode_vqf, encode_pvr, encode_vq, encode_vqf, DecodeOptions, Palette, Raster,
    SaveOptions,
};
use pvr_lib::color::PixelFormat;
use pvr_lib::pvr::{Pvr, TextureType};
use pvr_lib::vq::{DitherLevel, VqFormat, VqOptions};
use pvr_lib::vqf::Vqf;

fn solid(width: usize, height: usize, r: u8, g: u8, b: u8) -> Raster {
    let rgb = std::iter::repeat([r, g, b])
        .take(width * height)
        .flatten()
        .collect();
    Raster::from_rgb(width, height, rgb)
}

fn data_size_field(bytes: &[u8]) -> u32 {
    assert_eq!(&bytes[0..4], b"PVRT");
    u32::from_le_bytes(bytes[4..8].try_into().unwrap())
}

#[test]
fn solid_red_vq_collapses_to_one_code() {
    let raster = solid(8, 8, 0xFF, 0, 0);
    let options = VqOptions {
        format: VqFormat::Rgb565,
        num_codes: 16,
        mipmap: true,
        dither: DitherLevel::None,
        ..Default::default()
    };
    let (pvr, rms) = encode_vq(&raster, &options, None).unwrap();

    assert_eq!(rms, 0.0);
    assert_eq!(pvr.texture_type, TextureType::SmallVqMipmap);

    // All 22 index bytes (1x1 up to 8x8) name the same code.
    let indices = &pvr.data[16 * 8..];
    assert_eq!(indices.len(), 22);
    assert!(indices.windows(2).all(|w| w[0] == w[1]));

    // And every decoded level is solid red.
    let decoded = decode_pvr(&pvr, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.mip_count(), 4);
    for level in 0..4 {
        for pixel in decoded.rgb[level].chunks_exact(3) {
            assert_eq!(pixel, &[0xFF, 0, 0]);
        }
    }
}

#[test]
fn two_tone_twiddled_565() {
    let mut raster = solid(16, 16, 0, 0, 0);
    for y in 0..16 {
        for x in 0..8 {
            let i = (y * 16 + x) * 3;
            raster.rgb[0][i..i + 3].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
        }
    }

    let (pvr, _) = encode_pvr(&raster, &SaveOptions::default()).unwrap();
    let bytes = pvr.to_bytes().unwrap();

    // Texture type bytes: RGB565, twiddled; payload size counts the final
    // 8 header bytes.
    assert_eq!(&bytes[8..10], &[0x01, 0x01]);
    assert_eq!(data_size_field(&bytes), 2 * 16 * 16 + 8);

    let decoded = decode_pvr(&Pvr::from_bytes(&bytes).unwrap(), &DecodeOptions::default()).unwrap();
    assert_eq!(&decoded.rgb[0][0..3], &[0xFF, 0xFF, 0xFF]);
    assert_eq!(&decoded.rgb[0][15 * 3..16 * 3], &[0, 0, 0]);
}

#[test]
fn bit_alpha_is_all_or_nothing() {
    let mut raster = solid(32, 32, 10, 20, 30);
    let alpha: Vec<u8> = (0..32 * 32)
        .map(|i| {
            let (x, y) = (i % 32, i / 32);
            // A soft diagonal ramp; storage must snap it to 0 or 255.
            ((x + y) * 4).min(255) as u8
        })
        .collect();
    raster.alpha = Some(vec![alpha]);

    let options = SaveOptions {
        color_format: PixelFormat::Argb1555,
        ..Default::default()
    };
    let (pvr, _) = encode_pvr(&raster, &options).unwrap();
    let decoded = decode_pvr(&pvr, &DecodeOptions::default()).unwrap();

    let alpha = decoded.alpha.as_ref().unwrap();
    assert!(alpha[0].iter().all(|&a| a == 0x00 || a == 0xFF));
    assert!(alpha[0].contains(&0x00));
    assert!(alpha[0].contains(&0xFF));
}

#[test]
fn stride_sizes_with_and_without_padding() {
    let raster = solid(96, 16, 8, 4, 8);

    let (pvr, _) = encode_pvr(&raster, &SaveOptions::default()).unwrap();
    assert_eq!(pvr.texture_type, TextureType::Stride);
    assert_eq!(data_size_field(&pvr.to_bytes().unwrap()), 2 * 96 * 16 + 8);

    let (padded, _) = encode_pvr(
        &raster,
        &SaveOptions {
            pad: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(data_size_field(&padded.to_bytes().unwrap()), 2 * 128 * 16 + 8);

    // Linear payloads read straight back.
    let decoded = decode_pvr(&pvr, &DecodeOptions::default()).unwrap();
    assert_eq!(&decoded.rgb[0][0..3], &[8, 4, 8]);
}

#[test]
fn vq_then_flip_then_plain_reencode() {
    // Column bands keyed on the 2x2 block so VQ is nearly lossless.
    let mut raster = Raster::new(128, 128);
    for y in 0..128 {
        for x in 0..128 {
            let i = (y * 128 + x) * 3;
            let band = ((x / 2) * 4) as u8;
            raster.rgb[0][i..i + 3].copy_from_slice(&[band, 255 - band, 128]);
        }
    }

    let options = VqOptions {
        format: VqFormat::Argb4444,
        num_codes: 256,
        mipmap: true,
        dither: DitherLevel::None,
        ..Default::default()
    };
    let (pvr, _) = encode_vq(&raster, &options, None).unwrap();
    assert_eq!(pvr.texture_type, TextureType::VqMipmap);

    let mut decoded = decode_pvr(&pvr, &DecodeOptions::default()).unwrap();
    decoded.flip(true, false);

    let (replain, _) = encode_pvr(
        &decoded,
        &SaveOptions {
            color_format: PixelFormat::Argb4444,
            mipmaps: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(replain.texture_type, TextureType::TwiddledMipmap);

    let round = decode_pvr(&replain, &DecodeOptions::default()).unwrap();
    // Flipped (0, 0) lands on the original (127, 0), within the 4 bit
    // quantisation step.
    let original = &raster.rgb[0][127 * 3..127 * 3 + 3];
    let flipped = &round.rgb[0][0..3];
    for (o, f) in original.iter().zip(flipped) {
        assert!((*o as i32 - *f as i32).abs() <= 17, "{original:?} vs {flipped:?}");
    }
}

#[test]
fn reordering_never_changes_pixels() {
    let mut raster = Raster::new(16, 16);
    for (i, byte) in raster.rgb[0].iter_mut().enumerate() {
        *byte = (i * 11 % 256) as u8;
    }

    let base = VqOptions {
        format: VqFormat::Rgb565,
        num_codes: 32,
        mipmap: false,
        dither: DitherLevel::None,
        ..Default::default()
    };
    let plain = VqOptions {
        reorder: false,
        ..base.clone()
    };

    let (with_reorder, _) = encode_vq(&raster, &base, None).unwrap();
    let (without_reorder, _) = encode_vq(&raster, &plain, None).unwrap();

    let a = decode_pvr(&with_reorder, &DecodeOptions::default()).unwrap();
    let b = decode_pvr(&without_reorder, &DecodeOptions::default()).unwrap();
    assert_eq!(a.rgb, b.rgb);
}

#[test]
fn twiddled_mipmap_reencode_is_byte_identical() {
    let mut raster = Raster::new(16, 16);
    for (i, byte) in raster.rgb[0].iter_mut().enumerate() {
        *byte = (i * 7 % 256) as u8;
    }
    let options = SaveOptions {
        mipmaps: true,
        ..Default::default()
    };

    let (first, _) = encode_pvr(&raster, &options).unwrap();
    let bytes = first.to_bytes().unwrap();

    let decoded = decode_pvr(&first, &DecodeOptions::default()).unwrap();
    let (second, _) = encode_pvr(&decoded, &options).unwrap();
    assert_eq!(bytes, second.to_bytes().unwrap());
}

#[test]
fn vqf_and_pvr_vq_decode_identically() {
    let mut raster = Raster::new(16, 16);
    for (i, byte) in raster.rgb[0].iter_mut().enumerate() {
        *byte = (i % 200) as u8;
    }
    let options = VqOptions {
        num_codes: 16,
        mipmap: false,
        dither: DitherLevel::None,
        ..Default::default()
    };

    let (pvr, _) = encode_vq(&raster, &options, None).unwrap();
    let (vqf, _) = encode_vqf(&raster, &options).unwrap();

    let bytes = vqf.to_bytes().unwrap();
    let vqf = Vqf::from_bytes(&bytes).unwrap();

    let a = decode_pvr(&pvr, &DecodeOptions::default()).unwrap();
    let b = decode_vqf(&vqf, &DecodeOptions::default()).unwrap();
    assert_eq!(a.rgb[0], b.rgb[0]);
}

#[test]
fn palettised_texture_round_trips_with_its_palette() {
    let entries: Vec<[u8; 4]> = (0..256)
        .map(|i| [0xFF, i as u8, (i * 3 % 256) as u8, (255 - i) as u8])
        .collect();
    let indices: Vec<u8> = (0..16 * 16).map(|i| (i * 5 % 256) as u8).collect();
    let raster = Raster {
        width: 16,
        height: 16,
        rgb: vec![vec![0; 16 * 16 * 3]],
        alpha: None,
        indices: Some(vec![indices.clone()]),
        palette: Some(Palette {
            depth: 8,
            entries,
        }),
    };

    let options = SaveOptions {
        palette_depth: 8,
        ..Default::default()
    };
    let (pvr, pvp) = encode_pvr(&raster, &options).unwrap();
    assert_eq!(pvr.texture_type, TextureType::Palette8);
    let pvp = pvp.unwrap();

    let decoded = decode_pvr(
        &pvr,
        &DecodeOptions {
            palette: Some(pvp),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(decoded.indices.as_ref().unwrap()[0], indices);

    // Without the palette file a greyscale ramp substitutes.
    let grey = decode_pvr(&pvr, &DecodeOptions::default()).unwrap();
    let palette = grey.palette.as_ref().unwrap();
    assert_eq!(palette.entries[255], [0xFF, 255, 255, 255]);
}

#[test]
fn gbix_survives_the_container_round_trip() {
    let raster = solid(8, 8, 5, 5, 5);
    let (pvr, _) = encode_pvr(
        &raster,
        &SaveOptions {
            global_index: Some(42),
            ..Default::default()
        },
    )
    .unwrap();
    let bytes = pvr.to_bytes().unwrap();
    assert_eq!(&bytes[0..4], b"GBIX");
    let back = Pvr::from_bytes(&bytes).unwrap();
    assert_eq!(back.global_index, Some(42));
}

#[test]
fn yuv_textures_round_trip_close_enough() {
    // Horizontal grey ramp: chrominance is constant so YUV422 is gentle.
    let mut raster = Raster::new(16, 16);
    for y in 0..16 {
        for x in 0..16 {
            let v = (x * 16) as u8;
            let i = (y * 16 + x) * 3;
            raster.rgb[0][i..i + 3].copy_from_slice(&[v, v, v]);
        }
    }
    let options = SaveOptions {
        color_format: PixelFormat::Yuv422,
        ..Default::default()
    };
    let (pvr, _) = encode_pvr(&raster, &options).unwrap();
    let decoded = decode_pvr(&pvr, &DecodeOptions::default()).unwrap();
    for (orig, out) in raster.rgb[0].iter().zip(decoded.rgb[0].iter()) {
        assert!((*orig as i32 - *out as i32).abs() <= 8, "{orig} vs {out}");
    }
}
