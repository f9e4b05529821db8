use clap::{Args, Parser, Subcommand};
use krng::{CancelToken, Secret};
use log::info;
use std::error;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use rwm::{RasterAsset, VisibleOptions};
use vwm::io::effective_delimiter;
use vwm::ReadOptions;

#[derive(Debug)]
enum IprMarkError {
    UnknownVariant { variant: String },
    BadCrs { crs: String },
}

impl error::Error for IprMarkError {}
impl fmt::Display for IprMarkError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnknownVariant { variant } => {
                write!(
                    f,
                    "variant {:?} should be 'fictitious' or 'geometries'",
                    variant
                )
            }
            Self::BadCrs { crs } => {
                write!(f, "{:?} is not an EPSG coordinate reference", crs)
            }
        }
    }
}

#[derive(Parser)]
#[command(name = "iprmark", about = "Embed and detect IPR markers in geospatial assets")]
struct Opts {
    #[command(subcommand)]
    subcommand: SubCommand,
}

#[derive(Subcommand)]
enum SubCommand {
    /// Raster watermarking
    Raster {
        #[command(subcommand)]
        action: RasterAction,
    },
    /// Vector and tabular watermarking
    Vector {
        #[command(subcommand)]
        action: VectorAction,
    },
}

#[derive(Subcommand)]
enum RasterAction {
    /// Composite a visible watermark image into a raster
    EmbedVisible {
        raster: PathBuf,
        watermark: PathBuf,
        out: PathBuf,

        #[arg(long, default_value = "width")]
        fit: String,

        #[arg(long, default_value = "center")]
        position: String,

        #[arg(long, default_value_t = 1.0)]
        transparency: f64,

        #[arg(long)]
        distance_x: Option<i64>,

        #[arg(long)]
        distance_y: Option<i64>,

        /// Keep the watermark's own colors instead of grayscaling it
        #[arg(long)]
        no_grayscale: bool,

        /// Coordinate reference to assign, e.g. EPSG:4326
        #[arg(long)]
        crs: Option<String>,
    },
    /// Hide a message in a raster
    EmbedInvisible {
        raster: PathBuf,
        out: PathBuf,
        message: String,
    },
    /// Recover a hidden message from a suspect raster
    Detect {
        original: PathBuf,
        suspect: PathBuf,
    },
}

#[derive(Args)]
struct VectorReadArgs {
    #[arg(long)]
    delimiter: Option<String>,

    #[arg(long)]
    lat: Option<String>,

    #[arg(long)]
    lon: Option<String>,

    #[arg(long)]
    geom: Option<String>,

    #[arg(long)]
    crs: Option<String>,

    #[arg(long)]
    encoding: Option<String>,
}

impl VectorReadArgs {
    fn to_options(&self) -> ReadOptions {
        ReadOptions {
            delimiter: self.delimiter.clone(),
            lat: self.lat.clone(),
            lon: self.lon.clone(),
            geom: self.geom.clone(),
            crs: self.crs.clone(),
            encoding: self.encoding.clone(),
        }
    }
}

#[derive(Subcommand)]
enum VectorAction {
    /// Embed a marker ('fictitious' entries or extended 'geometries')
    Embed {
        variant: String,
        dataset: PathBuf,
        out: PathBuf,

        /// Marker id to embed, typically a UUID
        #[arg(long)]
        key: String,

        #[command(flatten)]
        read: VectorReadArgs,
    },
    /// Probe a suspect dataset for markers
    Detect {
        variant: String,
        original: PathBuf,
        suspect: PathBuf,

        /// Candidate marker ids, probed in order
        #[arg(long, required = true, num_args = 1..)]
        keys: Vec<String>,

        #[command(flatten)]
        read: VectorReadArgs,

        /// Delimiter of the suspect file, when it differs
        #[arg(long)]
        suspect_delimiter: Option<String>,
    },
}

fn parse_epsg(crs: &str) -> Result<u32, IprMarkError> {
    let trimmed = crs.trim();
    let digits = match trimmed.rsplit_once(':') {
        Some((authority, code)) if authority.eq_ignore_ascii_case("epsg") => code,
        Some(_) => {
            return Err(IprMarkError::BadCrs {
                crs: crs.to_string(),
            })
        }
        None => trimmed,
    };
    digits.parse().map_err(|_| IprMarkError::BadCrs {
        crs: crs.to_string(),
    })
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();
    let cancel = CancelToken::new();
    let scratch = tempfile::tempdir()?;

    match opts.subcommand {
        SubCommand::Raster { action } => match action {
            RasterAction::EmbedVisible {
                raster,
                watermark,
                out,
                fit,
                position,
                transparency,
                distance_x,
                distance_y,
                no_grayscale,
                crs,
            } => {
                let epsg = match crs {
                    Some(crs) => Some(parse_epsg(&crs)?),
                    None => None,
                };
                let options = VisibleOptions {
                    fit: fit.parse()?,
                    position: position.parse()?,
                    transparency,
                    distance: match (distance_x, distance_y) {
                        (Some(x), Some(y)) => Some((x, y)),
                        _ => None,
                    },
                    grayscale: !no_grayscale,
                };
                let asset = RasterAsset::open(&raster, epsg, scratch.path())?;
                let artifact = asset.embed_image(&watermark, &out, &options)?;
                println!("{}", artifact.display());
            }
            RasterAction::EmbedInvisible {
                raster,
                out,
                message,
            } => {
                let asset = RasterAsset::open(&raster, None, scratch.path())?;
                let artifact = asset.embed_message(&out, &message, &cancel)?;
                println!("{}", artifact.display());
            }
            RasterAction::Detect { original, suspect } => {
                let asset = RasterAsset::open(&original, None, scratch.path())?;
                match asset.detect_message(&suspect, &cancel)? {
                    Some(message) => println!("{}", message),
                    None => println!("None"),
                }
            }
        },
        SubCommand::Vector { action } => {
            let secret = Secret::from_env("SECRET_KEY")?;
            match action {
                VectorAction::Embed {
                    variant,
                    dataset,
                    out,
                    key,
                    read,
                } => {
                    let options = read.to_options();
                    let df = vwm::read_dataset(&dataset, &options)?;
                    let marked = match variant.as_str() {
                        "fictitious" => vwm::embed_fictitious(&df, &key, &secret, &cancel)?,
                        "geometries" => vwm::embed_geometries(&df, &key, &secret, &cancel)?,
                        other => {
                            return Err(IprMarkError::UnknownVariant {
                                variant: other.to_string(),
                            }
                            .into())
                        }
                    };
                    let delimiter = effective_delimiter(&dataset, &options)?;
                    vwm::write_dataset(&marked, &out, &delimiter)?;
                    info!("marked dataset written [rows={}]", marked.len());
                    println!("{}", out.display());
                }
                VectorAction::Detect {
                    variant,
                    original,
                    suspect,
                    keys,
                    read,
                    suspect_delimiter,
                } => {
                    let options = read.to_options();
                    let mut suspect_options = options.clone();
                    if suspect_delimiter.is_some() {
                        suspect_options.delimiter = suspect_delimiter;
                    }
                    let df = vwm::read_dataset(&original, &options)?;
                    let df_suspect = vwm::read_dataset(&suspect, &suspect_options)?;
                    let matched = match variant.as_str() {
                        "fictitious" => vwm::detect_fictitious_any(
                            &df, &df_suspect, &keys, &secret, &cancel,
                        )?,
                        "geometries" => vwm::detect_geometries_any(
                            &df, &df_suspect, &keys, &secret, &cancel,
                        )?,
                        other => {
                            return Err(IprMarkError::UnknownVariant {
                                variant: other.to_string(),
                            }
                            .into())
                        }
                    };
                    match matched {
                        Some(key) => println!("{}", key),
                        None => println!("None"),
                    }
                }
            }
        }
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => Err(e.to_string().into()),
        Ok(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_epsg() {
        assert_eq!(4326, parse_epsg("EPSG:4326").unwrap());
        assert_eq!(2100, parse_epsg("epsg:2100").unwrap());
        assert_eq!(32634, parse_epsg("32634").unwrap());
        assert!(parse_epsg("urn:ogc:def").is_err());
        assert!(parse_epsg("wrongcrs").is_err());
    }
}
