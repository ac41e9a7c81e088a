use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use foragecore::interface::{
    build_tracks, CompositeSummary, EddyStats, FeatureVector, HotspotBin, Ping,
};
use foragecore::prelude::{
    DataQualityEvent, ProcessingStage, StageConfig, StageContext, StageMetadata,
};
use foragecore::processing::{
    ConstraintStage, EnvironmentStage, HotspotStage, InferenceResult, InferenceStage,
    MotionStage, ResampleStage,
};
use foragecore::telemetry::MetricsSnapshot;

/// Raw inputs of a full run.
pub struct PipelineInputs {
    pub pings: Vec<Ping>,
    /// Findings from ingestion, replayed into the run's telemetry.
    pub ingest_events: Vec<DataQualityEvent>,
    pub composites: Vec<CompositeSummary>,
    pub eddy: EddyStats,
}

pub struct WorkflowResult {
    pub features: Vec<FeatureVector>,
    pub inference: InferenceResult,
    pub hotspots: Vec<HotspotBin>,
    pub notes: Vec<String>,
    pub events: Vec<DataQualityEvent>,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

fn run_stage<S: ProcessingStage>(
    stage: &mut S,
    name: &str,
    config: &StageConfig,
    input: S::Input,
    ctx: &mut StageContext,
    collected: &mut StageMetadata,
) -> anyhow::Result<S::Output> {
    stage
        .initialize(config)
        .with_context(|| format!("initializing {} stage", name))?;
    let output = stage
        .execute(input, ctx)
        .with_context(|| format!("executing {} stage", name))?;
    stage.cleanup();
    collected.notes.extend(output.metadata.notes);
    collected.events.extend(output.metadata.events);
    Ok(output.records)
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Resample through environment fusion, ending at the feature table.
    pub fn preprocess(
        &self,
        inputs: PipelineInputs,
        ctx: &mut StageContext,
        collected: &mut StageMetadata,
    ) -> anyhow::Result<Vec<FeatureVector>> {
        let stage_config = self.config.to_stage_config();

        for event in inputs.ingest_events {
            ctx.flag(collected, event);
        }
        let (tracks, track_events) = build_tracks(inputs.pings);
        for event in track_events {
            ctx.flag(collected, event);
        }

        let resampled = run_stage(
            &mut ResampleStage::new(),
            "resample",
            &stage_config,
            tracks,
            ctx,
            collected,
        )?;
        let motion = run_stage(
            &mut MotionStage::new(),
            "motion",
            &stage_config,
            resampled,
            ctx,
            collected,
        )?;
        let constrained = run_stage(
            &mut ConstraintStage::new(),
            "constraint",
            &stage_config,
            motion,
            ctx,
            collected,
        )?;
        run_stage(
            &mut EnvironmentStage::new(inputs.composites, inputs.eddy),
            "environment",
            &stage_config,
            constrained,
            ctx,
            collected,
        )
    }

    /// State inference and hotspot aggregation over a finished feature table.
    pub fn infer(
        &self,
        features: Vec<FeatureVector>,
        ctx: &mut StageContext,
        collected: &mut StageMetadata,
    ) -> anyhow::Result<(InferenceResult, Vec<HotspotBin>)> {
        let stage_config = self.config.to_stage_config();
        let inference = run_stage(
            &mut InferenceStage::new(),
            "inference",
            &stage_config,
            features,
            ctx,
            collected,
        )?;
        let hotspots = run_stage(
            &mut HotspotStage::new(),
            "hotspot",
            &stage_config,
            inference.observations.clone(),
            ctx,
            collected,
        )?;
        Ok((inference, hotspots))
    }

    pub fn execute(&self, inputs: PipelineInputs) -> anyhow::Result<WorkflowResult> {
        let mut ctx = StageContext::seeded(self.config.seed());
        let mut collected = StageMetadata::default();
        let features = self.preprocess(inputs, &mut ctx, &mut collected)?;
        let (inference, hotspots) = self.infer(features.clone(), &mut ctx, &mut collected)?;
        Ok(Self::finish(features, inference, hotspots, collected, &ctx))
    }

    /// Reruns inference on a feature table from an earlier run.
    pub fn execute_features(&self, features: Vec<FeatureVector>) -> anyhow::Result<WorkflowResult> {
        let mut ctx = StageContext::seeded(self.config.seed());
        let mut collected = StageMetadata::default();
        let (inference, hotspots) = self.infer(features.clone(), &mut ctx, &mut collected)?;
        Ok(Self::finish(features, inference, hotspots, collected, &ctx))
    }

    fn finish(
        features: Vec<FeatureVector>,
        inference: InferenceResult,
        hotspots: Vec<HotspotBin>,
        collected: StageMetadata,
        ctx: &StageContext,
    ) -> WorkflowResult {
        WorkflowResult {
            features,
            inference,
            hotspots,
            notes: collected.notes,
            events: collected.events,
            metrics: ctx.metrics.snapshot(),
        }
    }
}
