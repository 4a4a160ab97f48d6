use std::path::Path;

use chrono::Utc;
use thiserror::Error;

use crate::cache::{ImageManifest, LayerCache, LayerRecord};
use crate::error::BuildError;
use crate::recipe::{PlannedStage, Recipe};
use crate::stage::StageKey;

/**
    Failure reported by a [`StageRunner`] for a single stage.
*/
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StageFailure(pub String);

/**
    Inputs shared by every stage of one build.
*/
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Build context on the host.
    pub context: &'a Path,
    /// Working directory inside the image.
    pub workdir: &'a str,
}

/**
    Executes stages that are not already cached, and saves and restores the
    state a stage leaves behind so cached stages can be skipped.
*/
pub trait StageRunner {
    fn run(&mut self, stage: &PlannedStage, ctx: StageContext<'_>) -> Result<(), StageFailure>;

    /// Copy the current state into `layer`, an empty directory owned by the cache.
    fn snapshot(&mut self, layer: &Path) -> Result<(), StageFailure>;

    /// Replace the current state with a snapshot taken by [`StageRunner::snapshot`].
    fn restore(&mut self, layer: &Path) -> Result<(), StageFailure>;
}

/**
    What happened to one stage during a build.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    pub index: usize,
    pub description: String,
    pub key: StageKey,
    pub cached: bool,
}

/**
    Result of a successful build: the produced image and per-stage outcomes.
*/
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub image: ImageManifest,
    pub stages: Vec<StageOutcome>,
}

impl BuildReport {
    pub fn cached_count(&self) -> usize {
        self.stages.iter().filter(|s| s.cached).count()
    }

    pub fn executed_count(&self) -> usize {
        self.stages.len() - self.cached_count()
    }
}

/**
    Build `recipe`, reusing cached stages and running the rest in order.

    Either exactly one image manifest is written and returned, or the build
    fails and nothing is written. Stages that completed before a failure stay
    in the cache.

    A cached stage is skipped; its snapshot is restored into the runner before
    the next stage that has to run, or at the end when every stage is cached,
    so the runner always ends up holding the built image.
*/
pub fn build<R: StageRunner>(
    recipe: &Recipe,
    cache: &mut LayerCache,
    runner: &mut R,
) -> Result<BuildReport, BuildError> {
    let manifest = recipe.validate()?;
    tracing::info!(
        base = %recipe.base,
        format = %manifest.format,
        requirements = manifest.requirements.len(),
        "building image"
    );

    let planned = recipe.plan()?;
    let ctx = StageContext {
        context: &recipe.context,
        workdir: &recipe.workdir,
    };

    let mut outcomes = Vec::with_capacity(planned.len());
    // Latest cached stage whose output the runner does not hold yet.
    let mut pending: Option<&StageKey> = None;
    for stage in &planned {
        let description = stage.stage.to_string();
        let cached = cache.contains(&stage.key);

        if cached {
            tracing::info!(
                step = stage.index + 1,
                key = stage.key.short(),
                "CACHED {description}"
            );
            pending = Some(&stage.key);
        } else {
            if let Some(key) = pending.take() {
                restore(cache, runner, key)?;
            }
            tracing::info!(step = stage.index + 1, key = stage.key.short(), "{description}");
            runner.run(stage, ctx).map_err(|e| {
                tracing::error!(step = stage.index + 1, error = %e, "stage failed");
                BuildError::Stage {
                    index: stage.index + 1,
                    stage: description.clone(),
                    message: e.0,
                }
            })?;

            let snapshot = cache.stage_layer()?;
            runner.snapshot(snapshot.path()).map_err(|e| {
                BuildError::Cache(format!("snapshot layer {}: {e}", stage.key.short()))
            })?;
            cache.insert(
                LayerRecord {
                    key: stage.key.clone(),
                    stage: description.clone(),
                    created_at: Utc::now(),
                },
                snapshot,
            )?;
        }

        outcomes.push(StageOutcome {
            index: stage.index,
            description,
            key: stage.key.clone(),
            cached,
        });
    }
    if let Some(key) = pending {
        restore(cache, runner, key)?;
    }

    let last = planned
        .last()
        .ok_or_else(|| BuildError::Cache("recipe produced no stages".to_string()))?;
    let image = ImageManifest {
        id: format!("sha256:{}", last.key),
        base: recipe.base.clone(),
        layers: planned.iter().map(|s| s.key.clone()).collect(),
        workdir: recipe.workdir.clone(),
        exposed_port: recipe.port,
        command: recipe.command.clone(),
        created_at: Utc::now(),
    };
    cache.record_image(&image)?;
    tracing::info!(image = image.short_id(), "image built");

    Ok(BuildReport {
        image,
        stages: outcomes,
    })
}

fn restore<R: StageRunner>(
    cache: &LayerCache,
    runner: &mut R,
    key: &StageKey,
) -> Result<(), BuildError> {
    tracing::debug!(key = key.short(), "restoring cached layer");
    runner
        .restore(&cache.layer_dir(key))
        .map_err(|e| BuildError::Cache(format!("restore layer {}: {e}", key.short())))
}
