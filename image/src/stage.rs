use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/**
    One step in assembling an image.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    From { image: String },
    Workdir { path: String },
    InstallPackages { packages: Vec<String> },
    /**
        Copy paths relative to the build context into the working directory,
        preserving their relative location.
    */
    Copy { sources: Vec<PathBuf> },
    Run { command: String },
    Expose { port: u16 },
    Cmd { argv: Vec<String> },
}

impl Stage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::From { .. } => "from",
            Self::Workdir { .. } => "workdir",
            Self::InstallPackages { .. } => "packages",
            Self::Copy { .. } => "copy",
            Self::Run { .. } => "run",
            Self::Expose { .. } => "expose",
            Self::Cmd { .. } => "cmd",
        }
    }

    /**
        Containerfile instructions for this stage. This text is also the
        stage's canonical description when computing its key.
    */
    pub fn instructions(&self) -> Vec<String> {
        match self {
            Self::From { image } => vec![format!("FROM {image}")],
            Self::Workdir { path } => vec![format!("WORKDIR {path}")],
            Self::InstallPackages { packages } => {
                vec![format!("RUN {}", install_packages_command(packages))]
            }
            Self::Copy { sources } => sources
                .iter()
                .map(|src| {
                    let src = slash_path(src);
                    if src == "." {
                        "COPY . .".to_string()
                    } else {
                        format!("COPY {src} {src}")
                    }
                })
                .collect(),
            Self::Run { command } => vec![format!("RUN {command}")],
            Self::Expose { port } => vec![format!("EXPOSE {port}")],
            Self::Cmd { argv } => {
                let quoted: Vec<String> = argv
                    .iter()
                    .map(|arg| serde_json::Value::String(arg.clone()).to_string())
                    .collect();
                vec![format!("CMD [{}]", quoted.join(", "))]
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self.instructions();
        match lines.as_slice() {
            [only] => f.write_str(only),
            [first, ..] => write!(f, "{first} (+{} more)", lines.len() - 1),
            [] => f.write_str(self.kind()),
        }
    }
}

/**
    Shell command that installs system packages on a Debian-based runtime.
*/
pub fn install_packages_command(packages: &[String]) -> String {
    format!(
        "apt-get update && apt-get install -y --no-install-recommends {} && rm -rf /var/lib/apt/lists/*",
        packages.join(" ")
    )
}

pub(crate) fn slash_path(path: &std::path::Path) -> String {
    let joined = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/**
    Content-addressed cache key of a stage: covers the parent key, the
    stage's instructions and the digest of any files it copies.
*/
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageKey(String);

impl StageKey {
    pub fn derive(parent: Option<&StageKey>, stage: &Stage, content_digest: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        if let Some(parent) = parent {
            hasher.update(parent.0.as_bytes());
        }
        hasher.update([0u8]);
        for line in stage.instructions() {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        if let Some(digest) = content_digest {
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_is_rendered_in_exec_form() {
        let stage = Stage::Cmd {
            argv: vec!["converter".into(), "serve".into(), "--port".into(), "8000".into()],
        };
        assert_eq!(
            stage.instructions(),
            vec![r#"CMD ["converter", "serve", "--port", "8000"]"#]
        );
    }

    #[test]
    fn copy_preserves_relative_location() {
        let stage = Stage::Copy {
            sources: vec![PathBuf::from("Cargo.toml"), PathBuf::from("converter/Cargo.toml")],
        };
        assert_eq!(
            stage.instructions(),
            vec![
                "COPY Cargo.toml Cargo.toml",
                "COPY converter/Cargo.toml converter/Cargo.toml"
            ]
        );
        assert_eq!(stage.to_string(), "COPY Cargo.toml Cargo.toml (+1 more)");
    }

    #[test]
    fn key_depends_on_parent_and_content() {
        let stage = Stage::Copy {
            sources: vec![PathBuf::from(".")],
        };
        let root = StageKey::derive(None, &Stage::From { image: "debian".into() }, None);

        let a = StageKey::derive(Some(&root), &stage, Some("aaaa"));
        let b = StageKey::derive(Some(&root), &stage, Some("bbbb"));
        let orphan = StageKey::derive(None, &stage, Some("aaaa"));

        assert_ne!(a, b);
        assert_ne!(a, orphan);
        assert_eq!(a, StageKey::derive(Some(&root), &stage, Some("aaaa")));
        assert_eq!(a.as_str().len(), 64);
    }
}
