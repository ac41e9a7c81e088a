use anyhow::Context;
use clap::Parser;
use generator::profile::{build_composites, build_tracks};
use ingest::files::{load_composites, load_eddy_stats, load_features, load_pings};
use std::path::PathBuf;
use workflow::config::{InputSource, WorkflowConfig};
use workflow::output::write_outputs;
use workflow::runner::{PipelineInputs, Runner};

mod generator;
mod ingest;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Behavioral state inference over animal tracks")]
struct Args {
    /// Load a workflow config from YAML; flags below override it
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// Track CSV or JSON
    #[arg(long)]
    tracks: Option<PathBuf>,
    /// Satellite composite JSON file or directory
    #[arg(long)]
    composites: Option<PathBuf>,
    /// Altimetry pass JSON file or directory
    #[arg(long)]
    ssh_passes: Option<PathBuf>,
    /// Skip preprocessing and rerun inference on a feature CSV
    #[arg(long)]
    from_features: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// Run on generated tracks and composites
    #[arg(long, default_value_t = false)]
    synthetic: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut overrides = WorkflowConfig::from_args(args.tracks, args.composites, args.output_dir, args.seed);
    overrides.ssh_passes = args.ssh_passes;
    overrides.features = args.from_features;
    let mut workflow_config = match args.workflow {
        Some(path) => WorkflowConfig::load(path)?.merge(overrides),
        None => overrides,
    };
    if args.synthetic && workflow_config.synthetic.is_none() {
        workflow_config.synthetic = Some(Default::default());
    }

    let source = workflow_config.input_source()?;
    let output_dir = workflow_config.output_dir()?.to_path_buf();
    let threshold = workflow_config.stages.high_confidence_threshold;
    let runner = Runner::new(workflow_config);

    let result = match source {
        InputSource::Synthetic(generator) => {
            let pings = build_tracks(&generator).context("generating synthetic tracks")?;
            let composites = build_composites(&generator).context("generating synthetic composites")?;
            println!(
                "Synthetic run -> {} pings, {} composites (seed {})",
                pings.len(),
                composites.len(),
                generator.seed
            );
            runner.execute(PipelineInputs {
                pings,
                ingest_events: Vec::new(),
                composites,
                eddy: Default::default(),
            })?
        }
        InputSource::Files {
            tracks,
            composites,
            ssh_passes,
        } => {
            let (pings, ingest_events) = load_pings(&tracks)?;
            let composites = load_composites(&composites)?;
            let eddy = load_eddy_stats(ssh_passes.as_deref())?;
            println!(
                "Loaded {} pings ({} rejected), {} composites",
                pings.len(),
                ingest_events.len(),
                composites.len()
            );
            runner.execute(PipelineInputs {
                pings,
                ingest_events,
                composites,
                eddy,
            })?
        }
        InputSource::Features(path) => {
            let features = load_features(&path)?;
            println!("Loaded {} feature rows from {}", features.len(), path.display());
            runner.execute_features(features)?
        }
    };

    let summary = &result.inference.summary;
    println!(
        "Inference -> {} rows, {} EM iterations (converged {}), mean log-likelihood {:.4}",
        summary.rows, summary.iterations, summary.converged, summary.log_likelihood
    );
    for profile in &summary.states {
        println!(
            "  state {} = {}: {} rows, mean speed {:.1} km/day",
            profile.state, profile.behavior, profile.observations, profile.mean_speed_km_day
        );
    }
    println!(
        "Hotspots -> {} cells, {} data-quality events",
        result.hotspots.len(),
        result.events.len()
    );

    let paths = write_outputs(&output_dir, &result, threshold)?;
    println!(
        "Wrote {}, {}, {} and {}",
        paths.features.display(),
        paths.detailed.display(),
        paths.hotspots.display(),
        paths.summary.display()
    );
    println!(
        "Metrics -> processed {}, events {}, clamped {}, errors {}",
        result.metrics.processed, result.metrics.events, result.metrics.clamped, result.metrics.errors
    );

    Ok(())
}
