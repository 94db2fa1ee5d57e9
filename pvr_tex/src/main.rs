use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use pvr_image::{
    decode_pvr, decode_vqf, encode_pvr, encode_vq, encode_vqf, DecodeOptions, Raster, SaveOptions,
};
use pvr_lib::color::PixelFormat;
use pvr_lib::pvp::Pvp;
use pvr_lib::pvr::{Pvr, MAX_GBIX};
use pvr_lib::vq::{DitherLevel, Metric, MetricBase, VqFormat, VqOptions};
use pvr_lib::vqf::Vqf;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Input files: PVR, VQF, or any common image format.
    inputs: Vec<PathBuf>,

    /// Output file, or a directory when converting several inputs.
    /// The extension picks the output container (pvr, vqf, png, ...).
    #[arg(short, long)]
    output: PathBuf,

    /// VQ compress the output.
    #[arg(long)]
    vq: bool,

    /// Codebook size for VQ output, rounded up to a power of two.
    #[arg(long, default_value_t = 256)]
    codes: usize,

    /// Output colour format.
    #[arg(long, value_enum, default_value = "rgb565")]
    format: FormatArg,

    /// Error diffusion strength for VQ output.
    #[arg(long, value_enum, default_value = "subtle")]
    dither: DitherArg,

    /// Colour difference metric for VQ output.
    #[arg(long, value_enum, default_value = "equal")]
    metric: MetricArg,

    /// Tolerate larger errors in high frequency detail.
    #[arg(long)]
    frequency: bool,

    /// Generate a mipmap chain.
    #[arg(long)]
    mipmap: bool,

    /// Store texels row-major instead of twiddled (non-VQ only).
    #[arg(long)]
    no_twiddle: bool,

    /// Pad stride textures up to a power-of-two allocation.
    #[arg(long)]
    pad: bool,

    /// Flip horizontally before encoding.
    #[arg(long)]
    flip_h: bool,

    /// Flip vertically before encoding.
    #[arg(long)]
    flip_v: bool,

    /// Invert the alpha channel of raw input images (old PVR1 sources).
    #[arg(long)]
    invert_alpha: bool,

    /// Emit GBIX chunks, numbering files upward from this index.
    #[arg(long)]
    gbix: Option<u32>,

    /// Palette file to use when decoding palettised textures.
    #[arg(long)]
    palette: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Rgb565,
    Argb1555,
    Rgb555,
    Argb4444,
    Yuv422,
}

impl FormatArg {
    fn pixel_format(self) -> PixelFormat {
        match self {
            FormatArg::Rgb565 => PixelFormat::Rgb565,
            FormatArg::Argb1555 => PixelFormat::Argb1555,
            FormatArg::Rgb555 => PixelFormat::Rgb555,
            FormatArg::Argb4444 => PixelFormat::Argb4444,
            FormatArg::Yuv422 => PixelFormat::Yuv422,
        }
    }

    fn vq_format(self) -> VqFormat {
        match self {
            FormatArg::Rgb565 => VqFormat::Rgb565,
            FormatArg::Argb1555 | FormatArg::Rgb555 => VqFormat::Argb1555,
            FormatArg::Argb4444 => VqFormat::Argb4444,
            FormatArg::Yuv422 => VqFormat::Yuv422,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum DitherArg {
    None,
    Subtle,
    Full,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum MetricArg {
    Equal,
    Weighted,
}

/// Hands out consecutive global indices across one invocation.
struct GbixSession {
    next: Option<u32>,
}

impl GbixSession {
    fn alloc(&mut self) -> Option<u32> {
        let index = self.next?;
        if index > MAX_GBIX {
            warn!("global index {index:#X} is reserved for the system");
        }
        self.next = Some(index.wrapping_add(1));
        Some(index)
    }
}

fn main() -> ExitCode {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();

    let cli = Cli::parse();
    if cli.inputs.is_empty() {
        error!("no input files");
        return ExitCode::FAILURE;
    }

    let mut gbix = GbixSession { next: cli.gbix };
    let many = cli.inputs.len() > 1;

    for input in &cli.inputs {
        let output = if many || cli.output.is_dir() {
            let Some(name) = input.file_name() else {
                error!("{}: not a file", input.display());
                return ExitCode::FAILURE;
            };
            cli.output.join(name)
        } else {
            cli.output.clone()
        };

        if let Err(err) = process(input, &output, &cli, &mut gbix) {
            error!("{}: {err}", input.display());
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn load_input(path: &Path, cli: &Cli) -> Result<Raster, Box<dyn Error>> {
    let decode_options = DecodeOptions {
        palette: load_palette(path, cli),
        ..Default::default()
    };

    match extension(path).as_str() {
        "pvr" => {
            let pvr = Pvr::from_file(path)?;
            let mut raster = decode_pvr(&pvr, &decode_options)?;
            raster.convert_to_32bit();
            Ok(raster)
        }
        "vqf" => {
            let vqf = Vqf::from_file(path)?;
            Ok(decode_vqf(&vqf, &decode_options)?)
        }
        _ => {
            let image = image::open(path)?.to_rgba8();
            let mut raster = Raster::from_image(&image);
            if cli.invert_alpha {
                if let Some(alpha) = &mut raster.alpha {
                    for plane in alpha {
                        for a in plane {
                            *a = !*a;
                        }
                    }
                }
            }
            Ok(raster)
        }
    }
}

/// Looks for a palette next to the texture (`foo.pvr` -> `foo.pvp`) unless
/// one was named explicitly.
fn load_palette(path: &Path, cli: &Cli) -> Option<Pvp> {
    let palette_path = match &cli.palette {
        Some(path) => path.clone(),
        None => path.with_extension("pvp"),
    };
    match Pvp::from_file(&palette_path) {
        Ok(pvp) => Some(pvp),
        Err(err) => {
            if cli.palette.is_some() {
                warn!("{}: {err}", palette_path.display());
            }
            None
        }
    }
}

fn vq_options(cli: &Cli) -> VqOptions {
    VqOptions {
        format: cli.format.vq_format(),
        num_codes: cli.codes,
        mipmap: cli.mipmap,
        alpha: cli.format.vq_format().supports_alpha(),
        dither: match cli.dither {
            DitherArg::None => DitherLevel::None,
            DitherArg::Subtle => DitherLevel::Subtle,
            DitherArg::Full => DitherLevel::Full,
        },
        metric: Metric {
            base: match cli.metric {
                MetricArg::Equal => MetricBase::Equal,
                MetricArg::Weighted => MetricBase::Weighted,
            },
            frequency: cli.frequency,
        },
        ..Default::default()
    }
}

fn process(
    input: &Path,
    output: &Path,
    cli: &Cli,
    gbix: &mut GbixSession,
) -> Result<(), Box<dyn Error>> {
    let mut raster = load_input(input, cli)?;
    if cli.flip_h || cli.flip_v {
        raster.flip(cli.flip_h, cli.flip_v);
    }

    match extension(output).as_str() {
        "pvr" => {
            if cli.vq {
                let (pvr, rms) = encode_vq(&raster, &vq_options(cli), gbix.alloc())?;
                pvr.write_to_file(output)?;
                info!("{}: {:.3} average error", output.display(), rms);
            } else {
                let options = SaveOptions {
                    color_format: cli.format.pixel_format(),
                    twiddled: !cli.no_twiddle,
                    mipmaps: cli.mipmap,
                    pad: cli.pad,
                    global_index: gbix.alloc(),
                    ..Default::default()
                };
                let (pvr, pvp) = encode_pvr(&raster, &options)?;
                pvr.write_to_file(output)?;
                if let Some(pvp) = pvp {
                    pvp.write_to_file(output.with_extension("pvp"))?;
                }
            }
        }
        "vqf" => {
            let (vqf, rms) = encode_vqf(&raster, &vq_options(cli))?;
            vqf.write_to_file(output)?;
            info!("{}: {:.3} average error", output.display(), rms);
        }
        _ => {
            raster.convert_to_32bit();
            let image = raster
                .to_image(0)
                .ok_or("image has no pixel data")?;
            image.save(output)?;
        }
    }

    Ok(())
}
