//! Dataset folders

use crate::error::LoadError;
use std::path::{Path, PathBuf};

/// Names of the dataset folders under `root`, sorted
///
/// # Errors
/// Fails if `root` cannot be read.
pub fn list_datasets(root: &Path) -> Result<Vec<String>, LoadError> {
    tracing::info!("Listing available datasets...");
    let entries = std::fs::read_dir(root).map_err(|e| LoadError::io(format!("listing {}", root.display()), e))?;

    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();
    Ok(names)
}

/// List the datasets under `root` and write them to `list_file` as a JSON array.
///
/// # Errors
/// Fails if `root` cannot be read or `list_file` cannot be written.
pub fn write_dataset_list(root: &Path, list_file: &Path) -> Result<Vec<String>, LoadError> {
    let names = list_datasets(root)?;
    let body = serde_json::to_string(&names)?;
    std::fs::write(list_file, body).map_err(|e| LoadError::io(format!("writing {}", list_file.display()), e))?;
    tracing::info!("{} datasets listed in {}", names.len(), list_file.display());
    Ok(names)
}

/// Patient records of a dataset (`P*.json`), sorted by name
///
/// # Errors
/// Fails if `folder` cannot be read.
pub fn patient_files(folder: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let entries =
        std::fs::read_dir(folder).map_err(|e| LoadError::io(format!("listing {}", folder.display()), e))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with('P') && name.ends_with(".json")
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}
