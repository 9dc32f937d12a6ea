//! Persistence for assembled notebooks: timestamped, collision-proof writes
//! into the destination directory, and the matching read-back.

use crate::error::AgentError;
use crate::notebook::Notebook;
use chrono::Utc;
use fs_err as fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Write the notebook under `notebook_<unix-seconds>.ipynb`. When that name
/// already exists (another run inside the same clock tick) a `_<n>` suffix is
/// tried with create-new semantics, so the name check and the create are one
/// atomic step and runs never overwrite each other.
pub fn save_notebook(dest_dir: &Path, notebook: &Notebook) -> Result<PathBuf, AgentError> {
    fs::create_dir_all(dest_dir).map_err(|e| AgentError::Write(e.to_string()))?;
    let json = notebook.to_json()?;
    let stamp = Utc::now().timestamp();
    let mut attempt = 0usize;
    loop {
        let name = if attempt == 0 {
            format!("notebook_{stamp}.ipynb")
        } else {
            format!("notebook_{stamp}_{attempt}.ipynb")
        };
        let path = dest_dir.join(name);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(json.as_bytes())
                    .map_err(|e| AgentError::Write(e.to_string()))?;
                tracing::info!(path = %path.display(), "notebook saved");
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(AgentError::Write(e.to_string())),
        }
    }
}

pub fn load_notebook(path: &Path) -> Result<Notebook, AgentError> {
    let raw = fs::read_to_string(path).map_err(|e| AgentError::DataAccess(e.to_string()))?;
    Notebook::from_json(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_protocol::{CellSpec, NotebookPlan};
    use crate::notebook::CellKind;

    fn plan() -> NotebookPlan {
        NotebookPlan {
            title: None,
            cells: vec![
                CellSpec { cell_type: CellKind::Markdown, source: "# Report".into() },
                CellSpec { cell_type: CellKind::Code, source: "print('ok')".into() },
            ],
        }
    }

    #[test]
    fn persisted_format_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let nb = Notebook::from_plan(&plan());
        let path = save_notebook(dir.path(), &nb).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("notebook_"));
        assert_eq!(path.extension().unwrap(), "ipynb");
        let back = load_notebook(&path).unwrap();
        assert_eq!(back, nb);
    }

    #[test]
    fn saves_in_the_same_tick_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let nb = Notebook::from_plan(&plan());
        let a = save_notebook(dir.path(), &nb).unwrap();
        let b = save_notebook(dir.path(), &nb).unwrap();
        let c = save_notebook(dir.path(), &nb).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
        assert!(a.exists() && b.exists() && c.exists());
    }

    #[test]
    fn unwritable_destination_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the destination directory should be.
        let blocker = dir.path().join("dest");
        fs_err::write(&blocker, b"not a directory").unwrap();
        let err = save_notebook(&blocker, &Notebook::from_plan(&plan())).unwrap_err();
        assert!(matches!(err, AgentError::Write(_)), "got {err:?}");
    }

    #[test]
    fn loading_garbage_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ipynb");
        fs_err::write(&path, b"{ not json").unwrap();
        let err = load_notebook(&path).unwrap_err();
        assert!(matches!(err, AgentError::Format(_)), "got {err:?}");
        let err = load_notebook(&dir.path().join("absent.ipynb")).unwrap_err();
        assert!(matches!(err, AgentError::DataAccess(_)), "got {err:?}");
    }
}
