use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::digest::{collect_files, digest_files};
use crate::error::{BuildError, ManifestError};
use crate::manifest::{DependencyManifest, ManifestFormat};
use crate::stage::{Stage, StageKey};

static IMAGE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[A-Za-z0-9.-]+(?::[0-9]+)?/)?[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?(?:@sha256:[a-f0-9]{64})?$",
    )
    .expect("image reference regex is valid")
});

/**
    Dependency manifest files of a recipe. The first file is parsed and
    validated; the rest (lock files, member manifests) are copied alongside.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFiles {
    pub format: ManifestFormat,
    pub files: Vec<PathBuf>,
}

/**
    Everything needed to assemble a service image.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    /// Base runtime image reference.
    pub base: String,
    /// Working directory inside the image.
    pub workdir: String,
    /// System packages installed on top of the base runtime.
    pub system_packages: Vec<String>,
    pub manifest: ManifestFiles,
    /// Shell command that resolves and installs the declared dependencies.
    pub install: String,
    /// Optional shell command run after the application tree is copied.
    pub build: Option<String>,
    /// Application tree root; also the build context.
    pub context: PathBuf,
    pub port: u16,
    pub command: Vec<String>,
}

/**
    A stage together with its cache key and, for copies, the files it covers.
*/
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub index: usize,
    pub stage: Stage,
    pub key: StageKey,
    pub files: Vec<PathBuf>,
}

impl Recipe {
    /**
        Stages in execution order.
    */
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![
            Stage::From {
                image: self.base.clone(),
            },
            Stage::Workdir {
                path: self.workdir.clone(),
            },
        ];
        if !self.system_packages.is_empty() {
            stages.push(Stage::InstallPackages {
                packages: self.system_packages.clone(),
            });
        }
        stages.push(Stage::Copy {
            sources: self.manifest.files.clone(),
        });
        stages.push(Stage::Run {
            command: self.install.clone(),
        });
        stages.push(Stage::Copy {
            sources: vec![PathBuf::from(".")],
        });
        if let Some(build) = &self.build {
            stages.push(Stage::Run {
                command: build.clone(),
            });
        }
        stages.push(Stage::Expose { port: self.port });
        stages.push(Stage::Cmd {
            argv: self.command.clone(),
        });
        stages
    }

    /**
        Check the base runtime reference and parse the dependency manifest.
    */
    pub fn validate(&self) -> Result<DependencyManifest, BuildError> {
        if !IMAGE_REF_RE.is_match(&self.base) {
            return Err(BuildError::BaseRuntime(self.base.clone()));
        }
        let primary = self
            .manifest
            .files
            .first()
            .ok_or_else(|| BuildError::Manifest {
                path: self.context.clone(),
                source: ManifestError::Empty,
            })?;
        DependencyManifest::load(self.manifest.format, &self.context.join(primary))
    }

    /**
        Compute every stage's key from the current build context.
    */
    pub fn plan(&self) -> Result<Vec<PlannedStage>, BuildError> {
        let mut planned: Vec<PlannedStage> = Vec::new();

        for (index, stage) in self.stages().into_iter().enumerate() {
            let (files, digest) = match &stage {
                Stage::Copy { sources } => {
                    let files = collect_files(&self.context, sources)?;
                    let digest = digest_files(&self.context, &files)?;
                    (files, Some(digest))
                }
                _ => (Vec::new(), None),
            };
            let parent = planned.last().map(|p| &p.key);
            let key = StageKey::derive(parent, &stage, digest.as_deref());
            planned.push(PlannedStage {
                index,
                stage,
                key,
                files,
            });
        }

        Ok(planned)
    }
}
