//! Example: Sample band values at points from a GeoTIFF.
//!
//! Usage: cargo run --example sample_points -- <raster.tif> <x> <y> [tile_size]

use geotile::{Raster, SampleOptions, TileSize};
use std::env;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 4 {
        eprintln!("Usage: {} <raster.tif> <x> <y> [tile_size]", args[0]);
        eprintln!("Example: {} scene.tif 512034.5 4102201.0 256", args[0]);
        std::process::exit(1);
    }

    let x: f64 = args[2].parse().expect("Invalid x coordinate");
    let y: f64 = args[3].parse().expect("Invalid y coordinate");
    let tile_size = args
        .get(4)
        .map(|s| s.parse().expect("Invalid tile size"))
        .map(|size| TileSize::square(size).expect("Tile size must be positive"));

    let start = Instant::now();
    let mut raster = Raster::open(&args[1]).expect("Failed to open raster");
    let meta = raster.meta();
    println!(
        "Opened {} in {:.3}s: {} bands, {}x{} pixels, CRS '{}'",
        args[1],
        start.elapsed().as_secs_f64(),
        meta.band_count,
        meta.cols,
        meta.rows,
        meta.crs
    );

    let (xmin, xmax, ymin, ymax) = raster.extent();
    println!("Extent: x {:.3} to {:.3}, y {:.3} to {:.3}", xmin, xmax, ymin, ymax);

    let options = SampleOptions {
        tile_size,
        ..Default::default()
    };
    let wkt = format!("POINT({} {})", x, y);

    println!("\nSampling {}...", wkt);
    let query_start = Instant::now();
    match raster.extract(&[wkt.as_str()], None, &options) {
        Ok(results) => {
            for result in results {
                if result.is_resolved() {
                    println!("Values: {:?} ({:.4}s)", result.values, query_start.elapsed().as_secs_f64());
                } else {
                    println!("Point lies outside the raster");
                }
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    // The grid is cached, so a second query only pays for the tile read
    let query_start = Instant::now();
    if let Ok(results) = raster.extract(&[wkt.as_str()], None, &options) {
        println!("Second query: {:?} ({:.4}s)", results[0].values, query_start.elapsed().as_secs_f64());
    }
}
