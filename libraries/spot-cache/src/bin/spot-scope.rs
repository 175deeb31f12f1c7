use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use spot_cache::{SCHEMA_VERSION, SpotCache};

/// Inspect a favorite spot cache.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the cache file, e.g. ./spots.db
    path: PathBuf,

    /// Dump every cached favorite as JSON instead of the report
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::init();

    let args = Args::parse();
    let json = args.json;
    let file_path = args.path;

    if !file_path.exists() {
        eprintln!("Error: File '{}' does not exist", file_path.display());
        std::process::exit(1);
    }

    let cache = match SpotCache::open(&file_path) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("Error opening cache '{}': {}", file_path.display(), e);
            std::process::exit(1);
        }
    };

    if json {
        match cache.export_json() {
            Ok(exported) => println!("{exported}"),
            Err(e) => {
                eprintln!("Error exporting favorites: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    println!("SpotScope - Favorite Spot Cache Inspector");
    println!("=========================================");
    println!("File: {}", file_path.display());
    match cache.schema_version() {
        Ok(version) => println!("Schema version: {version} (supported: {SCHEMA_VERSION})"),
        Err(e) => println!("Schema version: unreadable ({e})"),
    }
    println!();

    let spots = match cache.favorites() {
        Ok(spots) => spots,
        Err(e) => {
            eprintln!("Error reading favorites: {e}");
            std::process::exit(1);
        }
    };

    println!("Favorites:");
    println!("----------");

    if spots.is_empty() {
        println!("  No favorites cached");
    }

    let mut per_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut legacy = 0;

    for spot in &spots {
        *per_category.entry(spot.category.to_string()).or_default() += 1;

        match &spot.place_id {
            Some(place_id) => println!("  {} [{place_id}]", spot.name),
            None => {
                legacy += 1;
                println!("  ⚠️  {} (row {}, no provider id)", spot.name, spot.row_id);
            }
        }
        if !spot.address.is_empty() {
            println!("      Address: {}", spot.address);
        }
        match spot.coordinate {
            Some(coordinate) => println!(
                "      Location: {:.5}, {:.5}",
                coordinate.latitude, coordinate.longitude
            ),
            None => println!("      Location: unknown"),
        }
        println!("      Category: {}", spot.category);
        println!("      Cached at: {}", spot.cached_at.to_rfc3339());
    }

    println!();
    println!("Summary:");
    println!("--------");
    println!("  Total favorites: {}", spots.len());
    for (category, count) in &per_category {
        println!("  {category}: {count}");
    }

    if legacy > 0 {
        println!("  ⚠️  {legacy} legacy rows without a provider id will never be reconciled");
    } else {
        println!("  ✅ Every cached favorite has a provider id");
    }
}
