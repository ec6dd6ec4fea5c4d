use crate::error::{PipelineError, Result};
use std::path::{Path, PathBuf};
use tracing::warn;

/// First `*.csv` in `dir` in directory-listing order.
///
/// A missing directory is treated like an empty one: there is simply nothing to load.
pub fn locate_input(dir: &Path) -> Result<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::InputNotFound(dir.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_csv(p))
        .collect();

    let chosen = candidates
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::InputNotFound(dir.to_path_buf()))?;
    if candidates.len() > 1 {
        warn!(
            "{} CSV files waiting in {}; loading {} only",
            candidates.len(),
            dir.display(),
            chosen.display()
        );
    }
    Ok(chosen)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dir_is_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("uploads");
        assert!(matches!(locate_input(&missing), Err(PipelineError::InputNotFound(_))));
    }

    #[test]
    fn test_ignores_non_csv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        assert!(matches!(locate_input(dir.path()), Err(PipelineError::InputNotFound(_))));
        std::fs::write(dir.path().join("Export.CSV"), "a,b\n").unwrap();
        assert_eq!(locate_input(dir.path()).unwrap().file_name().unwrap(), "Export.CSV");
    }

    #[test]
    fn test_picks_one_of_several() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "a\n").unwrap();
        std::fs::write(dir.path().join("b.csv"), "b\n").unwrap();
        let chosen = locate_input(dir.path()).unwrap();
        assert!(chosen.extension().unwrap() == "csv");
    }
}
