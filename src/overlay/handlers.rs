//! Operation handlers: one per 9P request kind, each resolving a upath and
//! applying copy-up where the contract table requires it.

use std::fs::{self, File, OpenOptions};
use std::time::SystemTime;

use filetime::{set_file_times, FileTime};

use crate::error::{OverlayError, Result};
use crate::overlay::copy_up::{copy_to_top, create_parents};
use crate::overlay::merge::{list_dir, MergedEntry};
use crate::overlay::path;
use crate::overlay::resolver::LayerStack;
use crate::overlay::whiteout::Whiteout;

/// Metadata returned by stat/walk.
#[derive(Debug, Clone)]
pub struct Stat {
    pub is_dir: bool,
    pub len: u64,
    pub mode: u32,
    pub mtime: SystemTime,
}

impl Stat {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        Stat {
            is_dir: meta.is_dir(),
            len: meta.len(),
            mode,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

/// An open resource: either a live file handle or a snapshot of a merged
/// directory's entries (directories have no single backing file descriptor
/// once merged across layers).
pub enum OpenHandle {
    File(File),
    Dir(Vec<MergedEntry>),
}

fn resolve_or_not_found(layers: &LayerStack, upath: &str) -> Result<(std::path::PathBuf, usize)> {
    let r = layers.resolve(upath);
    match r.depth {
        Some(d) => Ok((r.apath, d)),
        None => Err(OverlayError::NotFound(upath.to_string())),
    }
}

pub fn stat(layers: &LayerStack, upath: &str) -> Result<Stat> {
    let (apath, _depth) = resolve_or_not_found(layers, upath)?;
    let meta = fs::symlink_metadata(&apath).map_err(|e| OverlayError::from_io(upath, e))?;
    Ok(Stat::from_metadata(&meta))
}

/// Like `stat`, but failures are reported with the wording a walk reply is
/// expected to carry.
pub fn walk(layers: &LayerStack, upath: &str) -> Result<Stat> {
    stat(layers, upath).map_err(|_| OverlayError::NotFound("directory entry not found".to_string()))
}

pub fn open(layers: &LayerStack, upath: &str, write: bool) -> Result<OpenHandle> {
    let (apath, depth) = resolve_or_not_found(layers, upath)?;
    let meta = fs::symlink_metadata(&apath).map_err(|e| OverlayError::from_io(upath, e))?;

    if meta.is_dir() {
        return Ok(OpenHandle::Dir(list_dir(layers, upath)?));
    }

    if write {
        if depth != 0 {
            tracing::debug!(%upath, depth, "open: write intent on non-top layer, copying up");
        }
        copy_to_top(layers, upath, depth)?;
        let top_apath = layers.apath_at(upath, 0);
        let file = OpenOptions::new().read(true).write(true).open(&top_apath)?;
        Ok(OpenHandle::File(file))
    } else {
        let file = File::open(&apath)?;
        Ok(OpenHandle::File(file))
    }
}

pub fn create(layers: &LayerStack, upath: &str, is_dir: bool, mode: u32) -> Result<OpenHandle> {
    create_parents(layers, upath)?;
    clear_whiteout(layers, upath)?;
    let top_apath = layers.apath_at(upath, 0);

    if is_dir {
        fs::create_dir(&top_apath)?;
        set_unix_mode(&top_apath, mode)?;
        Ok(OpenHandle::Dir(Vec::new()))
    } else {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&top_apath)?;
        set_unix_mode(&top_apath, mode)?;
        Ok(OpenHandle::File(file))
    }
}

/// Removes any stale `.wh.<name>` marker at the top layer for `upath` before
/// a create proceeds, so a recreated path becomes visible again without the
/// caller needing to know about whiteout bookkeeping.
fn clear_whiteout(layers: &LayerStack, upath: &str) -> Result<()> {
    let parent = path::parent(upath);
    let name = path::basename(upath).expect("create target must have a basename");
    let marker = Whiteout::marker_name(std::ffi::OsStr::new(name));
    let marker_path = layers.apath_at(&parent, 0).join(marker);
    match fs::remove_file(&marker_path) {
        Ok(()) => {
            tracing::debug!(%upath, "create: cleared stale whiteout marker");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn whiteout(layers: &LayerStack, upath: &str) -> Result<()> {
    create_parents(layers, upath)?;
    let parent = path::parent(upath);
    let name = path::basename(upath).expect("whiteout target must have a basename");
    let dir = layers.apath_at(&parent, 0);
    Whiteout::create(&dir, std::ffi::OsStr::new(name)).map_err(|errno| {
        OverlayError::IoFailure(std::io::Error::from_raw_os_error(errno))
    })
}

pub fn remove(layers: &LayerStack, upath: &str) -> Result<()> {
    let (apath, depth) = resolve_or_not_found(layers, upath)?;

    if depth == 0 {
        let meta = fs::symlink_metadata(&apath).map_err(|e| OverlayError::from_io(upath, e))?;
        if meta.is_dir() {
            fs::remove_dir_all(&apath)?;
            whiteout(layers, upath)?;
            tracing::debug!(%upath, "remove: top-layer directory removed, whiteout written");
        } else {
            fs::remove_file(&apath)?;
        }
    } else {
        tracing::debug!(%upath, depth, "remove: entry resides on a lower layer, writing whiteout only");
        whiteout(layers, upath)?;
    }
    Ok(())
}

fn set_unix_mode(apath: &std::path::Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(apath, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (apath, mode);
    }
    Ok(())
}

/// Copies the resolved entry to the top layer (if it isn't already there)
/// before the caller applies a metadata mutation, per the corrected
/// chmod/chown/utimes/truncate contract.
fn copy_up_for_mutation(layers: &LayerStack, upath: &str) -> Result<std::path::PathBuf> {
    let (_apath, depth) = resolve_or_not_found(layers, upath)?;
    if depth != 0 {
        copy_to_top(layers, upath, depth)?;
    }
    Ok(layers.apath_at(upath, 0))
}

pub fn chmod(layers: &LayerStack, upath: &str, mode: u32) -> Result<()> {
    let apath = copy_up_for_mutation(layers, upath)?;
    set_unix_mode(&apath, mode)
}

pub fn chown(layers: &LayerStack, upath: &str, uid: u32, gid: u32) -> Result<()> {
    let apath = copy_up_for_mutation(layers, upath)?;
    #[cfg(unix)]
    {
        use nix::unistd::{chown as nix_chown, Gid, Uid};
        nix_chown(&apath, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|e| OverlayError::IoFailure(std::io::Error::from_raw_os_error(e as i32)))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (apath, uid, gid);
    }
    Ok(())
}

pub fn utimes(layers: &LayerStack, upath: &str, atime: SystemTime, mtime: SystemTime) -> Result<()> {
    let apath = copy_up_for_mutation(layers, upath)?;
    set_file_times(
        &apath,
        FileTime::from_system_time(atime),
        FileTime::from_system_time(mtime),
    )?;
    Ok(())
}

pub fn truncate(layers: &LayerStack, upath: &str, size: u64) -> Result<()> {
    let apath = copy_up_for_mutation(layers, upath)?;
    let file = OpenOptions::new().write(true).open(&apath)?;
    file.set_len(size)?;
    Ok(())
}

/// Same-parent rename only: joins `new_name` to the resolved entry's
/// existing parent at whatever depth it resolved to. Intentionally literal
/// — cross-directory and cross-layer rename remain out of scope.
pub fn rename(layers: &LayerStack, upath: &str, new_name: &str) -> Result<()> {
    let (apath, _depth) = resolve_or_not_found(layers, upath)?;
    let new_apath = apath
        .parent()
        .expect("resolved apath must have a parent")
        .join(new_name);
    fs::rename(&apath, &new_apath)?;
    Ok(())
}

pub fn sync() -> Result<()> {
    Err(OverlayError::Unsupported("sync is not implemented".to_string()))
}
