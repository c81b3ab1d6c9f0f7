//! Command line tools for GeoTIFF rasters.
//!
//! Every subcommand prints JSON to stdout; logs go to stderr.

use clap::{Args, Parser, Subcommand};
use geotile::{
    split_to_dir, BandSelection, Bounds, GeoTileError, Raster, SampleOptions, TileSize, TilingConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Inspect, tile and sample GeoTIFF rasters
#[derive(Parser)]
#[command(name = "geotile")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect, tile and sample GeoTIFF rasters", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// YAML tiling configuration supplying defaults for tile size, bands and bounds
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show raster metadata and extent
    Info(InfoArgs),
    /// List the tiles of a tile grid
    Grid(GridArgs),
    /// Sample band values at WKT points
    Sample(SampleArgs),
    /// Per-band statistics
    Stats(StatsArgs),
    /// Write each tile to its own GeoTIFF
    Split(SplitArgs),
}

#[derive(Args)]
struct InfoArgs {
    /// Input GeoTIFF
    raster: PathBuf,
}

/// Tile size flags, overriding the configuration.
#[derive(Args)]
struct TileArgs {
    /// Tile width in pixels
    #[arg(long)]
    tile_width: Option<usize>,

    /// Tile height in pixels
    #[arg(long)]
    tile_height: Option<usize>,
}

#[derive(Args)]
struct GridArgs {
    /// Input GeoTIFF
    raster: PathBuf,

    #[command(flatten)]
    tile: TileArgs,

    /// Restrict the grid to `xmin,xmax,ymin,ymax` in pixels
    #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true, conflicts_with = "crs_bounds")]
    pixel_bounds: Option<Vec<i64>>,

    /// Restrict the grid to `xmin,xmax,ymin,ymax` in raster coordinates
    #[arg(long, value_delimiter = ',', num_args = 4, allow_negative_numbers = true)]
    crs_bounds: Option<Vec<f64>>,
}

#[derive(Args)]
struct SampleArgs {
    /// Input GeoTIFF
    raster: PathBuf,

    /// WKT POINT or MULTIPOINT geometry; repeat for several
    #[arg(short, long = "wkt", required = true)]
    wkts: Vec<String>,

    /// Identifier per geometry; defaults to 1..N
    #[arg(long = "id")]
    ids: Vec<String>,

    /// 0-indexed bands in output order
    #[arg(short, long, value_delimiter = ',')]
    bands: Option<Vec<usize>>,

    /// Spatial reference of the geometries, checked against the raster
    #[arg(long)]
    geometry_crs: Option<String>,

    /// Replace non-finite values before sampling; also enabled by `finite_only` in the configuration
    #[arg(long)]
    finite_only: bool,

    #[command(flatten)]
    tile: TileArgs,
}

#[derive(Args)]
struct StatsArgs {
    /// Input GeoTIFF
    raster: PathBuf,

    #[command(flatten)]
    tile: TileArgs,
}

#[derive(Args)]
struct SplitArgs {
    /// Input GeoTIFF
    raster: PathBuf,

    /// Output directory
    out_dir: PathBuf,

    #[command(flatten)]
    tile: TileArgs,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    GeoTile(#[from] GeoTileError),

    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, CliError>;

#[derive(Serialize)]
struct InfoOutput<'a> {
    name: &'a str,
    #[serde(flatten)]
    meta: &'a geotile::RasterMeta,
    extent: (f64, f64, f64, f64),
    bounds: [(f64, f64); 5],
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => {
            debug!("Loading tiling configuration from {}", path.display());
            Some(TilingConfig::from_file(path)?)
        }
        None => None,
    };
    let configured = config.is_some();
    let config = config.unwrap_or_default();

    match cli.command {
        Commands::Info(args) => info_cmd(args),
        Commands::Grid(args) => grid_cmd(args, &config),
        Commands::Sample(args) => sample_cmd(args, &config, configured),
        Commands::Stats(args) => stats_cmd(args, &config),
        Commands::Split(args) => split_cmd(args, &config),
    }
}

fn tile_size(args: &TileArgs, config: &TilingConfig) -> Result<TileSize> {
    Ok(TileSize::new(
        args.tile_width.unwrap_or(config.tile_width),
        args.tile_height.unwrap_or(config.tile_height),
    )?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn info_cmd(args: InfoArgs) -> Result<()> {
    let raster = Raster::open(&args.raster)?;
    print_json(&InfoOutput {
        name: raster.name(),
        meta: raster.meta(),
        extent: raster.extent(),
        bounds: raster.bounds(),
    })
}

fn grid_cmd(args: GridArgs, config: &TilingConfig) -> Result<()> {
    let mut raster = Raster::open(&args.raster)?;
    let size = tile_size(&args.tile, config)?;

    let bounds = match (&args.pixel_bounds, &args.crs_bounds) {
        (Some(b), _) => Some(Bounds::Pixel { xmin: b[0], xmax: b[1], ymin: b[2], ymax: b[3] }),
        (_, Some(b)) => Some(Bounds::Crs { xmin: b[0], xmax: b[1], ymin: b[2], ymax: b[3] }),
        _ => config.bounds,
    };

    let grid = raster.tile_grid(size, bounds.as_ref())?;
    info!("{} tiles of {}x{}", grid.len(), size.width, size.height);
    print_json(&*grid)
}

fn sample_cmd(args: SampleArgs, config: &TilingConfig, configured: bool) -> Result<()> {
    let mut raster = Raster::open(&args.raster)?;
    let options = sample_options(&args, config, configured)?;
    let ids = (!args.ids.is_empty()).then_some(args.ids.as_slice());

    let results = raster.extract(&args.wkts, ids, &options)?;
    let unresolved = results.iter().filter(|r| !r.is_resolved()).count();
    if unresolved > 0 {
        info!("{} of {} points fall outside the raster", unresolved, results.len());
    }
    print_json(&results)
}

/// Sampling options from the flags, falling back to the configuration.
///
/// Without tile flags or a configuration file the whole raster is one tile,
/// and non-finite values are kept unless `--finite-only` is given.
fn sample_options(args: &SampleArgs, config: &TilingConfig, configured: bool) -> Result<SampleOptions> {
    let read = config.read_options();

    let tile_size = match (args.tile.tile_width, args.tile.tile_height, configured) {
        (None, None, false) => None,
        _ => Some(tile_size(&args.tile, config)?),
    };
    let band_order = match &args.bands {
        Some(bands) => Some(bands.clone()),
        None => match read.bands {
            BandSelection::All => None,
            BandSelection::One(band) => Some(vec![band]),
            BandSelection::List(bands) => Some(bands),
        },
    };

    Ok(SampleOptions {
        tile_size,
        band_order,
        geometry_crs: args.geometry_crs.clone(),
        finite_only: args.finite_only || (configured && read.finite_only),
        nan_replacement: read.nan_replacement,
    })
}

fn stats_cmd(args: StatsArgs, config: &TilingConfig) -> Result<()> {
    let mut raster = Raster::open(&args.raster)?;
    let stats = raster.band_stats(tile_size(&args.tile, config)?)?;
    print_json(&stats)
}

fn split_cmd(args: SplitArgs, config: &TilingConfig) -> Result<()> {
    let mut raster = Raster::open(&args.raster)?;
    let size = tile_size(&args.tile, config)?;
    let written = split_to_dir(&mut raster, size.width, size.height, &args.out_dir)?;
    print_json(&written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args(argv: &[&str]) -> SampleArgs {
        let argv = ["geotile", "sample", "scene.tif", "-w", "POINT(1 1)"].iter().chain(argv);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Sample(args) => args,
            _ => panic!("expected the sample subcommand"),
        }
    }

    #[test]
    fn test_sample_defaults_without_config() {
        let options = sample_options(&sample_args(&[]), &TilingConfig::default(), false).unwrap();
        assert_eq!(options, SampleOptions::default());
    }

    #[test]
    fn test_sample_uses_configured_read_options() {
        let config = TilingConfig::from_yaml_str("tile_width: 16\ntile_height: 8\nbands: 2\nnan_replacement: -1.0").unwrap();
        let options = sample_options(&sample_args(&[]), &config, true).unwrap();

        assert_eq!(options.tile_size, Some(TileSize::new(16, 8).unwrap()));
        assert_eq!(options.band_order, Some(vec![2]));
        assert!(options.finite_only);
        assert_eq!(options.nan_replacement, Some(-1.0));
    }

    #[test]
    fn test_sample_flags_override_config() {
        let config = TilingConfig::from_yaml_str("finite_only: false\nbands: [0, 1]").unwrap();
        let args = sample_args(&["--finite-only", "-b", "1", "--tile-width", "4"]);
        let options = sample_options(&args, &config, true).unwrap();

        assert!(options.finite_only);
        assert_eq!(options.band_order, Some(vec![1]));
        assert_eq!(options.tile_size, Some(TileSize::new(4, 256).unwrap()));
    }
}
