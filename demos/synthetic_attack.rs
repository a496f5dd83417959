//! Geometry-aware attack on synthetic ellipsoids
//!
//! Builds a PointNet-style classifier (random or loaded from JSON), samples
//! ellipsoid surfaces with analytic normals, attacks them and saves the
//! confirmed adversarial clouds.
//!
//! ```text
//! cargo run --bin synthetic_attack -- --samples 4 --points 512 --iterations 200 -v
//! ```

mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use geoattack_algorithms::{estimate_normals, orient_normals_outward};
use geoattack_attack::{
    evaluate_accuracy, AttackBatch, AttackOptions, Attacker, ModelAdapter, PointNetClassifier,
};
use geoattack_core::{CloudBatch, Point3f, Vector3f};
use geoattack_io::{append_summary, export_outcome, ExportOptions};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Attack a point cloud classifier on synthetic ellipsoids")]
struct Args {
    /// JSON file with attack options; command line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file with classifier weights; a random classifier is used otherwise
    #[arg(long)]
    model: Option<PathBuf>,

    /// Attack away from the predicted label instead of towards a chosen one
    #[arg(long)]
    untargeted: bool,

    /// Margin, CE or None
    #[arg(long)]
    classification_loss: Option<String>,

    /// CD, L2 or None
    #[arg(long)]
    distance_loss: Option<String>,

    /// adam or sgd
    #[arg(long)]
    optimizer: Option<String>,

    #[arg(long)]
    learning_rate: Option<f32>,

    #[arg(long)]
    binary_steps: Option<usize>,

    #[arg(long)]
    iterations: Option<usize>,

    #[arg(long)]
    initial_const: Option<f32>,

    /// Inject tangent-plane jitter before each forward pass
    #[arg(long)]
    jitter: bool,

    /// Project inward offsets onto the tangent plane after each step
    #[arg(long)]
    project: bool,

    #[arg(long)]
    seed: Option<u64>,

    /// Estimate normals from the sampled points instead of using the analytic ones
    #[arg(long)]
    estimate_normals: bool,

    /// Number of clouds to attack
    #[arg(long, default_value_t = 4)]
    samples: usize,

    /// Points per cloud
    #[arg(long, default_value_t = 256)]
    points: usize,

    /// Classes of the random classifier
    #[arg(long, default_value_t = 10)]
    classes: usize,

    #[arg(long, default_value = "adv_output")]
    output: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn attack_options(&self) -> Result<AttackOptions> {
        let mut options = match &self.config {
            Some(path) => AttackOptions::from_json_file(path)
                .with_context(|| format!("reading attack options from {}", path.display()))?,
            None => AttackOptions::default(),
        };

        if self.untargeted {
            options.targeted = false;
        }
        if let Some(kind) = &self.classification_loss {
            options.classification_loss = kind.clone();
        }
        if let Some(kind) = &self.distance_loss {
            options.distance_loss = kind.clone();
        }
        if let Some(kind) = &self.optimizer {
            options.optimizer = kind.clone();
        }
        if let Some(lr) = self.learning_rate {
            options.learning_rate = lr;
        }
        if let Some(steps) = self.binary_steps {
            options.binary_search_steps = steps;
        }
        if let Some(iterations) = self.iterations {
            options.iterations = iterations;
        }
        if let Some(c) = self.initial_const {
            options.initial_const = c;
        }
        if let Some(seed) = self.seed {
            options.seed = seed;
        }
        options.jitter |= self.jitter;
        options.project_gradient |= self.project;
        Ok(options)
    }
}

/// Evenly spread points on an axis-aligned ellipsoid, with unit outward normals
fn ellipsoid(axes: Vector3f, count: usize) -> (Vec<Point3f>, Vec<Vector3f>) {
    let golden_angle = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
    let mut points = Vec::with_capacity(count);
    let mut normals = Vec::with_capacity(count);

    for i in 0..count {
        let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
        let ring = (1.0 - y * y).sqrt();
        let theta = golden_angle * i as f32;
        let unit = Vector3f::new(ring * theta.cos(), y, ring * theta.sin());

        let p = unit.component_mul(&axes);
        let gradient = Vector3f::new(
            p.x / (axes.x * axes.x),
            p.y / (axes.y * axes.y),
            p.z / (axes.z * axes.z),
        );
        points.push(Point3f::from(p));
        normals.push(gradient.normalize());
    }

    (points, normals)
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    let options = args.attack_options()?;
    let seed = options.seed;
    let config = options.into_config().context("invalid attack configuration")?;

    let model = match &args.model {
        Some(path) => PointNetClassifier::from_json_file(path)
            .with_context(|| format!("loading classifier from {}", path.display()))?,
        None => PointNetClassifier::random(&[64, 128], &[64], args.classes, seed)?,
    };
    let classes = model.num_classes();
    anyhow::ensure!(classes >= 2, "classifier must have at least two classes");

    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let (clouds, fields): (Vec<_>, Vec<_>) = (0..args.samples)
        .map(|_| {
            let axes = Vector3f::new(
                rng.gen_range(0.3..1.0),
                rng.gen_range(0.3..1.0),
                rng.gen_range(0.3..1.0),
            );
            ellipsoid(axes, args.points)
        })
        .unzip();
    let fields = if args.estimate_normals {
        clouds
            .iter()
            .map(|cloud| {
                let mut normals = estimate_normals(cloud, 16)?;
                orient_normals_outward(cloud, &mut normals);
                Ok(normals)
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        fields
    };
    let points = CloudBatch::from_points(&clouds)?;
    let normals = CloudBatch::from_vectors(&fields)?;

    // The clean predictions serve as ground truth for a synthetic dataset
    let ground_truth = model.predict(&points)?;
    info!(
        "clean accuracy: {:.2}",
        evaluate_accuracy(&model, &points, &ground_truth)?
    );
    let targets: Vec<usize> = ground_truth
        .iter()
        .map(|&gt| (gt + rng.gen_range(1..classes)) % classes)
        .collect();

    let mode = config.mode;
    let targets = mode.is_targeted().then_some(targets);
    let batch = AttackBatch::new(points, normals, ground_truth.clone(), targets)?;
    let attacker = Attacker::new(&model, config)?;
    let outcome = attacker.attack(&batch)?;

    let confirmation = outcome.confirm(&model, &ground_truth, mode)?;
    let paths = export_outcome(
        &args.output,
        &outcome,
        &ground_truth,
        &confirmation,
        &ExportOptions::default(),
        None,
    )?;

    let rate = confirmation.rate();
    append_summary(&args.output, rate)?;
    info!(
        "attack success: {:.2}% ({} records in {})",
        rate * 100.0,
        paths.len(),
        args.output.display()
    );

    for (k, found) in outcome.found_at.iter().enumerate() {
        match found {
            Some(at) => info!(
                "sample {}: gt {} -> {} at step [{}/{}], loss {:.6}",
                k,
                ground_truth[k],
                confirmation.predicted[k],
                at.outer_step,
                at.inner_step,
                outcome.best_loss[k]
            ),
            None => info!("sample {}: no adversarial example found", k),
        }
    }

    Ok(())
}
