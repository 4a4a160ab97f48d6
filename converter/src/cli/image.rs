use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use service_image::{
    LayerCache, ManifestFiles, ManifestFormat, ProcessRunner, Recipe, build, render_containerfile,
};

const BASE_IMAGE: &str = "rust:1-slim-bookworm";
const WORKDIR: &str = "/app";

/// Fetch dependencies against stub sources so the layer only depends on the manifests.
const INSTALL_COMMAND: &str = "mkdir -p converter/src image/src && echo 'fn main() {}' > converter/src/main.rs && touch image/src/lib.rs && cargo fetch";
const BUILD_COMMAND: &str = "cargo install --path converter --root /usr/local && rm -rf target";

/// Image recipe for this service.
pub fn converter_recipe(context: PathBuf, port: u16) -> Recipe {
    Recipe {
        base: BASE_IMAGE.to_string(),
        workdir: WORKDIR.to_string(),
        system_packages: vec!["ffmpeg".to_string()],
        manifest: ManifestFiles {
            format: ManifestFormat::Cargo,
            files: ["Cargo.toml", "converter/Cargo.toml", "image/Cargo.toml"]
                .into_iter()
                .map(PathBuf::from)
                .collect(),
        },
        install: INSTALL_COMMAND.to_string(),
        build: Some(BUILD_COMMAND.to_string()),
        context,
        port,
        command: [
            "converter",
            "serve",
            "--host",
            "0.0.0.0",
            "--port",
            &port.to_string(),
        ]
        .into_iter()
        .map(str::to_string)
        .collect(),
    }
}

#[derive(Parser, Debug)]
pub struct ImageCommand {
    #[command(subcommand)]
    pub action: ImageAction,
}

#[derive(Subcommand, Debug)]
pub enum ImageAction {
    /// Print the Containerfile for the service image
    Render(RenderArgs),
    /// Show every stage's cache key and whether it is cached
    Plan(PlanArgs),
    /// Build the image into a local staging root
    Build(BuildArgs),
}

#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Build context (repository root)
    #[arg(long, default_value = ".")]
    pub context: PathBuf,

    /// Port the service listens on inside the image
    #[arg(long, default_value = "8000")]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Layer cache directory
    #[arg(long, default_value = ".image-cache")]
    pub cache: PathBuf,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub context: ContextArgs,

    /// Layer cache directory
    #[arg(long, default_value = ".image-cache")]
    pub cache: PathBuf,

    /// Staging root standing in for the image filesystem
    #[arg(long, default_value = ".image-root")]
    pub root: PathBuf,
}

impl ImageCommand {
    pub async fn run(self) -> Result<()> {
        match self.action {
            ImageAction::Render(args) => {
                let recipe = converter_recipe(args.context.context, args.context.port);
                let rendered = render_containerfile(&recipe);
                match args.output {
                    Some(path) => tokio::fs::write(&path, rendered)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?,
                    None => print!("{rendered}"),
                }
                Ok(())
            }
            ImageAction::Plan(args) => {
                let recipe = converter_recipe(args.context.context, args.context.port);
                let (cache, planned) = tokio::task::spawn_blocking(move || {
                    recipe.validate()?;
                    let cache = LayerCache::open(args.cache)?;
                    let planned = recipe.plan()?;
                    anyhow::Ok((cache, planned))
                })
                .await??;

                for stage in &planned {
                    let status = if cache.contains(&stage.key) {
                        "cached"
                    } else {
                        "build"
                    };
                    println!(
                        "{:>2}  {:<6}  {}  {}",
                        stage.index + 1,
                        status,
                        stage.key.short(),
                        stage.stage
                    );
                }
                Ok(())
            }
            ImageAction::Build(args) => {
                let recipe = converter_recipe(args.context.context, args.context.port);
                let report = tokio::task::spawn_blocking(move || {
                    let mut cache = LayerCache::open(args.cache)?;
                    let mut runner = ProcessRunner::new(args.root);
                    anyhow::Ok(build(&recipe, &mut cache, &mut runner)?)
                })
                .await??;

                println!(
                    "Built {} ({} stages, {} cached)",
                    report.image.id,
                    report.stages.len(),
                    report.cached_count()
                );
                Ok(())
            }
        }
    }
}
