//! Recursive directory copying for template materialization.

use crate::core::error::HovelError;
use std::fs;
use std::path::Path;

/// Copies `src` into `dst`, creating `dst` as needed. Top-level entries whose file
/// name is listed in `skip` are left out. Existing files in `dst` are overwritten.
pub fn copy_tree(src: &Path, dst: &Path, skip: &[&str]) -> Result<u64, HovelError> {
    fs::create_dir_all(dst).map_err(HovelError::IoError)?;
    let mut copied = 0;
    for entry in fs::read_dir(src).map_err(HovelError::IoError)? {
        let entry = entry.map_err(HovelError::IoError)?;
        let name = entry.file_name();
        if name.to_str().is_some_and(|n| skip.contains(&n)) {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        if from.is_dir() {
            copied += copy_tree(&from, &to, &[])?;
        } else {
            fs::copy(&from, &to).map_err(HovelError::IoError)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Removes `dst` if present, then copies `src` into it.
pub fn replace_tree(src: &Path, dst: &Path) -> Result<u64, HovelError> {
    if dst.exists() {
        fs::remove_dir_all(dst).map_err(HovelError::IoError)?;
    }
    copy_tree(src, dst, &[])
}
