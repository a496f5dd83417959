//! Surface roughness of saved point clouds
//!
//! Reads `.obj` vertex lists (as written by `synthetic_attack`) and reports
//! the smoothness metric of each, plus the average over all files.

mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use geoattack_algorithms::smoothness;
use geoattack_io::read_vertex_list;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Compute the smoothness metric of point cloud vertex lists")]
struct Args {
    /// Vertex list files
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Neighbors used to estimate normals
    #[arg(long, default_value_t = 16)]
    k_normal: usize,

    /// Neighbors the out-of-plane offsets are averaged over
    #[arg(long, default_value_t = 16)]
    k: usize,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    let mut values = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let points = read_vertex_list(path).with_context(|| format!("reading {}", path.display()))?;
        match smoothness(&points, args.k_normal, args.k) {
            Ok(value) => {
                info!("{}: {:.6}", path.display(), value);
                values.push(value);
            }
            Err(e) => warn!("{}: skipped ({})", path.display(), e),
        }
    }

    if !values.is_empty() {
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        info!("mean smoothness over {} clouds: {:.6}", values.len(), mean);
    }
    Ok(())
}
