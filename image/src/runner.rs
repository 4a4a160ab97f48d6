use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::build::{StageContext, StageFailure, StageRunner};
use crate::recipe::PlannedStage;
use crate::stage::{Stage, install_packages_command};

const SHELL: &str = "sh";
const STDERR_TAIL_LINES: usize = 20;

/**
    Runs stages against a local staging root that stands in for the image
    filesystem. Commands run through `sh -c` inside the staged working
    directory; copies land under the same directory.

    The base stage empties the staging root. Snapshots are full copies of
    the root, and restoring one replaces the root entirely.
*/
pub struct ProcessRunner {
    root: PathBuf,
}

impl ProcessRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /**
        Host path of the image working directory.
    */
    pub fn workdir(&self, workdir: &str) -> PathBuf {
        self.root.join(workdir.trim_start_matches('/'))
    }

    fn shell(&self, command: &str, cwd: &Path) -> Result<(), StageFailure> {
        std::fs::create_dir_all(cwd)
            .map_err(|e| StageFailure(format!("create {}: {e}", cwd.display())))?;

        let output = Command::new(SHELL)
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| StageFailure(format!("spawn {SHELL}: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
        Err(StageFailure(format!("{}: {}", output.status, tail.trim())))
    }

    fn clear_root(&self) -> Result<(), StageFailure> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .map_err(|e| StageFailure(format!("clear staging root: {e}")))?;
        }
        std::fs::create_dir_all(&self.root)
            .map_err(|e| StageFailure(format!("create staging root: {e}")))
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_link(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_link(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::copy(from, to).map(|_| ())
}

impl StageRunner for ProcessRunner {
    fn run(&mut self, stage: &PlannedStage, ctx: StageContext<'_>) -> Result<(), StageFailure> {
        let workdir = self.workdir(ctx.workdir);

        match &stage.stage {
            Stage::From { image } => {
                self.clear_root()?;
                std::fs::write(self.root.join(".base"), image)
                    .map_err(|e| StageFailure(format!("record base: {e}")))
            }
            Stage::Workdir { .. } => std::fs::create_dir_all(&workdir)
                .map_err(|e| StageFailure(format!("create {}: {e}", workdir.display()))),
            Stage::InstallPackages { packages } => {
                self.shell(&install_packages_command(packages), &workdir)
            }
            Stage::Run { command } => self.shell(command, &workdir),
            Stage::Copy { .. } => {
                for file in &stage.files {
                    let from = ctx.context.join(file);
                    let to = workdir.join(file);
                    if let Some(parent) = to.parent() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            StageFailure(format!("create {}: {e}", parent.display()))
                        })?;
                    }
                    std::fs::copy(&from, &to).map_err(|e| {
                        StageFailure(format!("copy {}: {e}", from.display()))
                    })?;
                }
                tracing::debug!(files = stage.files.len(), "copied into staging root");
                Ok(())
            }
            // Metadata only; recorded in the image manifest.
            Stage::Expose { .. } | Stage::Cmd { .. } => Ok(()),
        }
    }

    fn snapshot(&mut self, layer: &Path) -> Result<(), StageFailure> {
        copy_tree(&self.root, layer)
            .map_err(|e| StageFailure(format!("snapshot {}: {e}", self.root.display())))
    }

    fn restore(&mut self, layer: &Path) -> Result<(), StageFailure> {
        self.clear_root()?;
        copy_tree(layer, &self.root)
            .map_err(|e| StageFailure(format!("restore {}: {e}", layer.display())))
    }
}
