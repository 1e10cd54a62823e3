//! Locates the lab project on disk and resolves where data files live.
//!
//! A "project" is the enclosing git repository of the process working
//! directory. Measurement data lands under `data/` inside it, progress
//! monitor pages under `progress-monitor/`. All of these can be
//! redirected at runtime, which notebook sessions do constantly.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::{debug, warn};

/// Name of the file that points at a development checkout of this crate.
const DEV_PATH_FILE: &str = ".pathtobenchtop";
/// Name of the file holding the port of a local monitor web server.
const MONITOR_PORT_FILE: &str = ".monitorhostport";
/// Environment variable that overrides project discovery entirely.
const PROJECT_DIR_ENV: &str = "BENCHTOP_PROJECT_DIR";

lazy_static! {
    static ref PROJECT_DIR: RwLock<PathBuf> = RwLock::new(discover_project_dir());
    static ref FILE_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);
    static ref MONITOR_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Walks up from `start` looking for a directory containing `.git`.
fn find_repo_root(start: &Path) -> Option<PathBuf> {
    // `.git` is a file rather than a directory in worktrees and submodules.
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

fn dir_is_unwritable(dir: &Path) -> bool {
    fs::metadata(dir)
        .map(|meta| meta.permissions().readonly())
        .unwrap_or(false)
}

/// Figures out the project directory once, at first use.
///
/// Order of precedence: the `BENCHTOP_PROJECT_DIR` environment variable
/// (a `.env` file is honored), then the git repository enclosing the
/// working directory, then the working directory itself.
fn discover_project_dir() -> PathBuf {
    dotenv::dotenv().ok();

    let dir = match std::env::var(PROJECT_DIR_ENV) {
        Ok(val) if !val.is_empty() => PathBuf::from(val),
        _ => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            match find_repo_root(&cwd) {
                Some(root) => root,
                None => {
                    warn!("No git repository found above {}", cwd.display());
                    warn!("Defaulting project dir to {}", cwd.display());
                    cwd
                }
            }
        }
    };
    if dir_is_unwritable(&dir) {
        warn!("Cannot write to this project dir: {}", dir.display());
    }
    dir
}

/// Root of the current lab project.
pub fn project_dir() -> PathBuf {
    read_lock(&PROJECT_DIR).clone()
}

/// Points the session at a different project root.
pub fn set_project_dir<P: Into<PathBuf>>(dir: P) {
    let dir = dir.into();
    if dir_is_unwritable(&dir) {
        warn!("Cannot write to this project dir: {}", dir.display());
    }
    *write_lock(&PROJECT_DIR) = dir;
}

/// Where measurement data belongs for this project.
pub fn data_home() -> PathBuf {
    project_dir().join("data")
}

/// Directory that relative data filenames resolve against.
///
/// Defaults to [`data_home`]; experiment scripts usually retarget it to
/// a per-session subdirectory before saving anything.
pub fn file_dir() -> PathBuf {
    read_lock(&FILE_DIR).clone().unwrap_or_else(data_home)
}

/// Retargets where relative data filenames resolve.
pub fn set_file_dir<P: Into<PathBuf>>(dir: P) {
    *write_lock(&FILE_DIR) = Some(dir.into());
}

/// Where sweep progress pages are written.
pub fn monitor_dir() -> PathBuf {
    read_lock(&MONITOR_DIR)
        .clone()
        .unwrap_or_else(|| project_dir().join("progress-monitor"))
}

/// Retargets where sweep progress pages are written.
pub fn set_monitor_dir<P: Into<PathBuf>>(dir: P) {
    *write_lock(&MONITOR_DIR) = Some(dir.into());
}

/// Path to the development checkout of this crate, if the project
/// declares one in a `.pathtobenchtop` file. Falls back to the project
/// directory itself.
pub fn development_dir() -> PathBuf {
    let marker = project_dir().join(DEV_PATH_FILE);
    match fs::read_to_string(&marker) {
        Ok(contents) => match contents.lines().next() {
            Some(line) if !line.trim().is_empty() => PathBuf::from(line.trim()),
            _ => project_dir(),
        },
        Err(_) => project_dir(),
    }
}

/// Port of the progress monitor web server, read from the project's
/// `.monitorhostport` file. `None` when no server is configured.
pub fn monitor_host_port() -> Option<u16> {
    let marker = project_dir().join(MONITOR_PORT_FILE);
    let contents = fs::read_to_string(marker).ok()?;
    contents.lines().next()?.trim().parse().ok()
}

/// Turns a data filename into an absolute path that exists.
///
/// Relative names land in [`file_dir`]. Missing directories are created
/// and the file itself is touched so the path can be fully resolved.
///
/// Args:
///     filename: data file name, relative or absolute
pub fn resolve_data_file<P: AsRef<Path>>(filename: P) -> Result<PathBuf> {
    let filename = filename.as_ref();
    let target = if filename.is_absolute() {
        filename.to_path_buf()
    } else {
        file_dir().join(filename)
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
    }
    if !target.exists() {
        fs::File::create(&target)
            .with_context(|| format!("Failed to touch data file {}", target.display()))?;
    }
    let resolved = target
        .canonicalize()
        .with_context(|| format!("Failed to resolve data file {}", target.display()))?;
    debug!("Saving to file: {}", resolved.display());
    Ok(resolved)
}

/// Resolves a data filename that must already exist, for loading.
pub fn resolve_existing_file<P: AsRef<Path>>(filename: P) -> Result<PathBuf> {
    let filename = filename.as_ref();
    let target = if filename.is_absolute() {
        filename.to_path_buf()
    } else {
        file_dir().join(filename)
    };
    if !target.exists() {
        bail!("No such data file: {}", target.display());
    }
    target
        .canonicalize()
        .with_context(|| format!("Failed to resolve data file {}", target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_find_repo_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("myproject");
        let nested = root.join("notebooks").join("2026-08");
        fs::create_dir_all(&nested).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();

        assert_eq!(find_repo_root(&nested), Some(root.clone()));
        assert_eq!(find_repo_root(&root), Some(root));
    }

    #[test]
    fn test_find_repo_root_none() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("plain").join("dir");
        fs::create_dir_all(&nested).unwrap();
        // The tempdir itself lives under /tmp, which is not a repo.
        assert_eq!(find_repo_root(&nested), None);
    }

    #[test]
    #[serial]
    fn test_directory_layout_follows_project_dir() {
        let dir = tempdir().unwrap();
        set_project_dir(dir.path());
        set_file_dir(dir.path().join("data"));
        set_monitor_dir(dir.path().join("progress-monitor"));

        assert_eq!(project_dir(), dir.path());
        assert_eq!(data_home(), dir.path().join("data"));
        assert_eq!(file_dir(), dir.path().join("data"));
        assert_eq!(monitor_dir(), dir.path().join("progress-monitor"));
    }

    #[test]
    #[serial]
    fn test_resolve_data_file_creates_missing_pieces() {
        let dir = tempdir().unwrap();
        set_project_dir(dir.path());
        set_file_dir(dir.path().join("data").join("session1"));

        let resolved = resolve_data_file("trace.bin").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.exists());
        assert!(resolved.ends_with("trace.bin"));

        // A second resolve of the same name is idempotent.
        assert_eq!(resolve_data_file("trace.bin").unwrap(), resolved);
    }

    #[test]
    #[serial]
    fn test_resolve_existing_file_requires_presence() {
        let dir = tempdir().unwrap();
        set_project_dir(dir.path());
        set_file_dir(dir.path().join("data"));

        let err = resolve_existing_file("nothing_here.bin").unwrap_err();
        assert!(err.to_string().contains("nothing_here.bin"));

        resolve_data_file("present.bin").unwrap();
        assert!(resolve_existing_file("present.bin").is_ok());
    }

    #[test]
    #[serial]
    fn test_development_dir_marker_file() {
        let dir = tempdir().unwrap();
        set_project_dir(dir.path());

        // No marker file: falls back to the project dir.
        assert_eq!(development_dir(), dir.path());

        fs::write(dir.path().join(DEV_PATH_FILE), "/opt/benchtop-dev\n").unwrap();
        assert_eq!(development_dir(), PathBuf::from("/opt/benchtop-dev"));
    }

    #[test]
    #[serial]
    fn test_monitor_host_port_parsing() {
        let dir = tempdir().unwrap();
        set_project_dir(dir.path());

        assert_eq!(monitor_host_port(), None);

        fs::write(dir.path().join(MONITOR_PORT_FILE), "8050\n").unwrap();
        assert_eq!(monitor_host_port(), Some(8050));

        fs::write(dir.path().join(MONITOR_PORT_FILE), "not a port\n").unwrap();
        assert_eq!(monitor_host_port(), None);
    }
}
