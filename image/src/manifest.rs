use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BuildError, ManifestError};

static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(\[[A-Za-z0-9._,\s-]*\])?\s*((?:===|==|>=|<=|~=|!=|>|<)\s*[A-Za-z0-9.*+!_-]+(?:\s*,\s*(?:===|==|>=|<=|~=|!=|>|<)\s*[A-Za-z0-9.*+!_-]+)*)?\s*(?:;.*)?$",
    )
    .expect("requirement regex is valid")
});

/**
    Resolver format a dependency manifest is written for.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestFormat {
    /// pip-style `requirements.txt`.
    Requirements,
    /// A `Cargo.toml` package or workspace manifest.
    Cargo,
}

impl ManifestFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirements => "requirements",
            Self::Cargo => "cargo",
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/**
    One name/version constraint from a dependency manifest.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    /**
        Version constraint as written, e.g. `>=0.110,<1` or `1.0`.
        `None` means any version.
    */
    pub constraint: Option<String>,
}

/**
    Ordered, immutable list of requirements, consumed once per build.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
    pub format: ManifestFormat,
    pub requirements: Vec<Requirement>,
}

impl DependencyManifest {
    /**
        Parse manifest text in the given format.
    */
    pub fn parse(format: ManifestFormat, text: &str) -> Result<Self, ManifestError> {
        let requirements = match format {
            ManifestFormat::Requirements => parse_requirements(text)?,
            ManifestFormat::Cargo => parse_cargo(text)?,
        };
        Ok(Self {
            format,
            requirements,
        })
    }

    /**
        Read and parse a manifest file.
    */
    pub fn load(format: ManifestFormat, path: &Path) -> Result<Self, BuildError> {
        let text = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        Self::parse(format, &text).map_err(|source| BuildError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.requirements.iter().map(|r| r.name.as_str())
    }
}

fn parse_requirements(text: &str) -> Result<Vec<Requirement>, ManifestError> {
    let mut requirements = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        // Resolver options (-r, --index-url, ...) carry no requirement.
        if line.starts_with('-') {
            tracing::debug!(line = index + 1, option = line, "skipping resolver option");
            continue;
        }

        let captures =
            REQUIREMENT_RE
                .captures(line)
                .ok_or_else(|| ManifestError::InvalidRequirement {
                    line: index + 1,
                    text: raw.trim().to_string(),
                })?;

        requirements.push(Requirement {
            name: captures[1].to_string(),
            constraint: captures
                .get(3)
                .map(|m| m.as_str().split_whitespace().collect::<String>()),
        });
    }

    Ok(requirements)
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_cargo(text: &str) -> Result<Vec<Requirement>, ManifestError> {
    let table: toml::Table = text
        .parse()
        .map_err(|e: toml::de::Error| ManifestError::InvalidCargo(e.message().to_string()))?;

    let workspace = table.get("workspace").and_then(|v| v.as_table());
    if !table.contains_key("package") && workspace.is_none() {
        return Err(ManifestError::InvalidCargo(
            "neither [package] nor [workspace] is declared".to_string(),
        ));
    }

    let mut requirements = Vec::new();
    let sections = [
        table.get("dependencies"),
        workspace.and_then(|w| w.get("dependencies")),
    ];
    for section in sections.into_iter().flatten() {
        let deps = section.as_table().ok_or_else(|| {
            ManifestError::InvalidCargo("dependencies must be a table".to_string())
        })?;
        for (name, entry) in deps {
            requirements.push(Requirement {
                name: name.clone(),
                constraint: cargo_constraint(name, entry)?,
            });
        }
    }

    Ok(requirements)
}

fn cargo_constraint(name: &str, entry: &toml::Value) -> Result<Option<String>, ManifestError> {
    match entry {
        toml::Value::String(version) => Ok(Some(version.clone())),
        toml::Value::Table(fields) => {
            if let Some(version) = fields.get("version") {
                return version
                    .as_str()
                    .map(|v| Some(v.to_string()))
                    .ok_or_else(|| {
                        ManifestError::InvalidCargo(format!("'{name}': version must be a string"))
                    });
            }
            if fields.contains_key("workspace")
                || fields.contains_key("path")
                || fields.contains_key("git")
            {
                return Ok(None);
            }
            Err(ManifestError::InvalidCargo(format!(
                "'{name}': no version, path, git or workspace source"
            )))
        }
        _ => Err(ManifestError::InvalidCargo(format!(
            "'{name}': dependency must be a string or table"
        ))),
    }
}
