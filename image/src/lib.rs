/*!
    Layered, cache-aware image builds.

    A [`Recipe`] describes a service image: a base runtime, system packages,
    a dependency manifest copied in on its own, a dependency install step, the
    application tree and a startup command on a fixed port. The recipe expands
    into an ordered list of [`Stage`]s, each keyed by a content hash of its
    inputs chained to the previous key.

    ```ignore
    let mut cache = LayerCache::open(".image-cache")?;
    let mut runner = ProcessRunner::new(".image-root");
    let report = build(&recipe, &mut cache, &mut runner)?;
    println!("{} ({} cached)", report.image.id, report.cached_count());
    ```

    Changing only application files leaves every key up to the dependency
    install unchanged, so those stages are reused from the cache.
*/

mod build;
mod cache;
mod containerfile;
mod digest;
mod error;
mod manifest;
mod recipe;
mod runner;
mod stage;

pub use self::build::{BuildReport, StageContext, StageFailure, StageOutcome, StageRunner, build};
pub use self::cache::{ImageManifest, LayerCache, LayerRecord};
pub use self::containerfile::render_containerfile;
pub use self::digest::{IGNORE_FILE, collect_files, digest_files};
pub use self::error::{BuildError, ManifestError};
pub use self::manifest::{DependencyManifest, ManifestFormat, Requirement};
pub use self::recipe::{ManifestFiles, PlannedStage, Recipe};
pub use self::runner::ProcessRunner;
pub use self::stage::{Stage, StageKey, install_packages_command};
