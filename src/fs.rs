use std::{
    fs::create_dir,
    path::{Path, PathBuf, MAIN_SEPARATOR_STR},
};

use anyhow::{anyhow, Result};
use log::debug;
use rustix::fs::{chmod, Mode};

/// Create `path` and all missing parent directories, chmod-ing each newly
/// created directory to `mode`. Already-existing directories are left alone.
pub fn mkdir_p<P: AsRef<Path>>(path: P, mode: Mode) -> Result<()> {
    for dir in descending_dirs(path.as_ref().to_str().unwrap()) {
        debug!("creating directory: {}", &dir);
        match create_dir(&dir) {
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => (),
            Err(e) => return Err(anyhow!("unable to create directory {}: {}", dir, e)),
            Ok(_) => {
                chmod(&dir, mode)
                    .map_err(|e| anyhow!("unable to change mode of {}: {}", dir, e))?;
            }
        }
    }
    Ok(())
}

// Given a path, return a list of it and its parents in descending order.
// For example, "/a/b/c", returns the Vector ["/a", "/a/b", "/a/b/c"].
fn descending_dirs(path: &str) -> Vec<String> {
    let dirs = path.split('/').collect::<Vec<&str>>();
    (1..=dirs.len())
        .map(|i| dirs[..i].join("/"))
        .filter(|s| !s.is_empty())
        .collect()
}

// The behavior of Path::join is surprising, as it does not actually join paths
// when the path argument is absolute, rather it returns the absolute one. This
// version joins the paths as expected.
pub trait JoinRelative {
    fn join_relative<P: AsRef<Path>>(&self, path: P) -> PathBuf;
}

impl JoinRelative for Path {
    fn join_relative<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let p = path.as_ref();
        if p.is_absolute() {
            let relative = p.strip_prefix(MAIN_SEPARATOR_STR).unwrap();
            Path::join(self, relative)
        } else {
            Path::join(self, p)
        }
    }
}
