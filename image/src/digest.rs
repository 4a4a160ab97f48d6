use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};

use crate::error::BuildError;
use crate::stage::slash_path;

/**
    Ignore file honoured when walking the build context.
*/
pub const IGNORE_FILE: &str = ".dockerignore";

/**
    Expand copy sources into the files they cover, relative to `context`.

    Directories are walked recursively with `.dockerignore` rules applied.
    The result is sorted and free of duplicates.

    Patterns follow gitignore rules: an unanchored `target` also matches
    nested `target` directories, so write `/target` to match only the one at
    the context root.
*/
pub fn collect_files(context: &Path, sources: &[PathBuf]) -> Result<Vec<PathBuf>, BuildError> {
    let mut files = Vec::new();

    for source in sources {
        let full = context.join(source);
        let metadata = std::fs::metadata(&full).map_err(|e| BuildError::io(&full, e))?;

        if metadata.is_file() {
            files.push(source.clone());
            continue;
        }

        let walker = WalkBuilder::new(&full)
            .standard_filters(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| BuildError::Cache(format!("walk {}: {e}", full.display())))?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(context)
                .map_err(|_| {
                    BuildError::Cache(format!(
                        "{} escapes the build context",
                        entry.path().display()
                    ))
                })?
                .to_path_buf();
            files.push(relative);
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/**
    Digest of a set of context files: each file's relative path and bytes,
    in the given order.
*/
pub fn digest_files(context: &Path, files: &[PathBuf]) -> Result<String, BuildError> {
    let mut hasher = Sha256::new();

    for file in files {
        let full = context.join(file);
        let bytes = std::fs::read(&full).map_err(|e| BuildError::io(&full, e))?;
        hasher.update(slash_path(file).as_bytes());
        hasher.update([0u8]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }

    Ok(hex::encode(hasher.finalize()))
}
