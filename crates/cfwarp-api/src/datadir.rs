//! Data-directory resolution.

use std::io;
use std::path::PathBuf;

const DEFAULT_DIR_NAME: &str = ".cloudflare-warp";

/// Resolve the client data directory.
///
/// An explicit path wins; otherwise `$HOME/.cloudflare-warp`; as a last
/// resort a relative `.cloudflare-warp`.
#[must_use]
pub fn resolve_data_dir(dir: Option<PathBuf>) -> PathBuf {
    match dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .map(|home| home.join(DEFAULT_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR_NAME)),
    }
}

/// Resolve the data directory and create it if missing.
///
/// # Errors
///
/// Returns the underlying I/O error when the directory cannot be created.
pub fn ensure_data_dir(dir: Option<PathBuf>) -> io::Result<PathBuf> {
    let dir = resolve_data_dir(dir);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = resolve_data_dir(Some(PathBuf::from("/tmp/warp-test")));
        assert_eq!(dir, PathBuf::from("/tmp/warp-test"));
    }

    #[test]
    fn default_ends_with_dot_dir() {
        let dir = resolve_data_dir(None);
        assert!(dir.ends_with(DEFAULT_DIR_NAME));
    }

    #[test]
    fn ensure_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested").join("data");
        let dir = ensure_data_dir(Some(target.clone())).unwrap();
        assert_eq!(dir, target);
        assert!(target.is_dir());
    }
}
