use directories::ProjectDirs;
use std::{env, path::{Path, PathBuf}};

/// Data directory holding the CSV inputs. `TABULA_DATA_DIR` overrides the
/// conventional `./data`.
pub fn default_data_dir() -> PathBuf {
    match env::var("TABULA_DATA_DIR") {
        Ok(custom) => PathBuf::from(custom),
        Err(_) => PathBuf::from("data"),
    }
}

/// Destination directory for generated notebooks. `TABULA_DEST_DIR` overrides;
/// otherwise the platform data dir is used.
pub fn default_dest_dir() -> Option<PathBuf> {
    if let Ok(custom) = env::var("TABULA_DEST_DIR") {
        return Some(PathBuf::from(custom));
    }
    ProjectDirs::from("com", "Tabula", "Tabula").map(|pd| pd.data_dir().join("notebooks"))
}

pub fn is_path_within(base: &Path, candidate: &Path) -> bool {
    match candidate.canonicalize().and_then(|p| base.canonicalize().map(|b| (b, p))) {
        Ok((b, p)) => p.starts_with(b),
        Err(_) => false,
    }
}

pub fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}
