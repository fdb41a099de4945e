//! Copy-up: materializing a path and its ancestors into the top layer
//! before a mutation is allowed to proceed.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use filetime::{set_file_mtime, FileTime};

use crate::error::{OverlayError, Result};
use crate::overlay::path;
use crate::overlay::resolver::LayerStack;

/// Duplicates a single path element (file or directory) from `src` into
/// `dst`. A no-op if `dst` already exists. Preserves permission bits and
/// modification time; does not preserve ownership or extended attributes.
fn duplicate(src: &Path, dst: &Path) -> Result<()> {
    if dst.symlink_metadata().is_ok() {
        return Ok(());
    }
    let meta = fs::symlink_metadata(src).map_err(|e| OverlayError::from_io(&src.display().to_string(), e))?;
    let mtime = FileTime::from_last_modification_time(&meta);

    if meta.is_dir() {
        fs::create_dir(dst)?;
        fs::set_permissions(dst, meta.permissions())?;
        set_file_mtime(dst, mtime)?;
    } else {
        let mut src_file = File::open(src)?;
        let mut dst_file = OpenOptions::new().create(true).write(true).open(dst)?;

        let copy_result: io::Result<()> = io::copy(&mut src_file, &mut dst_file)
            .and_then(|_| dst_file.sync_all())
            .map(|_| ());

        match copy_result {
            Ok(()) => {
                drop(dst_file);
                fs::set_permissions(dst, meta.permissions())?;
                set_file_mtime(dst, mtime)?;
            }
            Err(e) => {
                drop(dst_file);
                let _ = fs::remove_file(dst);
                return Err(e.into());
            }
        }
    }
    Ok(())
}

/// Materializes `upath` and every ancestor directory from `src_depth` into
/// the top layer (depth 0). Idempotent: elements already present at the top
/// are left untouched.
pub fn copy_to_top(layers: &LayerStack, upath: &str, src_depth: usize) -> Result<()> {
    if src_depth == 0 {
        return Ok(());
    }
    tracing::debug!(%upath, src_depth, "copy-up: started");
    for prefix in path::prefixes(upath) {
        let src = layers.apath_at(&prefix, src_depth);
        let dst = layers.apath_at(&prefix, 0);
        duplicate(&src, &dst)?;
    }
    tracing::debug!(%upath, src_depth, "copy-up: finished");
    Ok(())
}

/// Ensures the parent directory of `upath` is materialized in the top
/// layer, so a subsequent create can write directly into it.
pub fn create_parents(layers: &LayerStack, upath: &str) -> Result<()> {
    let parent = path::parent(upath);
    if parent == "/" {
        return Ok(());
    }
    let resolved = layers.resolve(&parent);
    match resolved.depth {
        None => Err(OverlayError::NotFound(parent)),
        Some(0) => Ok(()),
        Some(d) => copy_to_top(layers, &parent, d),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;
    use tempfile::tempdir;

    fn stack_with_lower_file(upath: &str, contents: &str) -> (tempfile::TempDir, tempfile::TempDir, LayerStack) {
        let top = tempdir().unwrap();
        let bottom = tempdir().unwrap();
        let rel = upath.trim_start_matches('/');
        if let Some(parent) = std::path::Path::new(rel).parent() {
            if !parent.as_os_str().is_empty() {
                stdfs::create_dir_all(bottom.path().join(parent)).unwrap();
            }
        }
        stdfs::write(bottom.path().join(rel), contents).unwrap();
        let stack = LayerStack::new(vec![top.path().to_path_buf(), bottom.path().to_path_buf()]);
        (top, bottom, stack)
    }

    #[test]
    fn test_copy_to_top_materializes_file() {
        let (top, _bottom, stack) = stack_with_lower_file("/a/b", "hello");
        copy_to_top(&stack, "/a/b", 1).unwrap();
        assert!(top.path().join("a").is_dir());
        assert_eq!(stdfs::read_to_string(top.path().join("a/b")).unwrap(), "hello");
    }

    #[test]
    fn test_copy_to_top_idempotent() {
        let (top, _bottom, stack) = stack_with_lower_file("/a/b", "hello");
        copy_to_top(&stack, "/a/b", 1).unwrap();
        copy_to_top(&stack, "/a/b", 1).unwrap();
        assert_eq!(stdfs::read_to_string(top.path().join("a/b")).unwrap(), "hello");
    }

    #[test]
    fn test_copy_to_top_no_op_at_depth_zero() {
        let (top, _bottom, stack) = stack_with_lower_file("/a/b", "hello");
        copy_to_top(&stack, "/a/b", 0).unwrap();
        assert!(!top.path().join("a").exists());
    }

    #[test]
    fn test_create_parents_materializes_ancestor() {
        let (top, _bottom, stack) = stack_with_lower_file("/a/b", "hello");
        create_parents(&stack, "/a/c").unwrap();
        assert!(top.path().join("a").is_dir());
    }
}
