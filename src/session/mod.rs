//! The 9P2000.L dispatch surface: binds each fid to a resolved upath (the
//! only state a session carries, per the overlay's design) and translates
//! each decoded request into one `overlay::handlers` call.
//!
//! Handlers perform ordinary blocking filesystem syscalls; per the
//! concurrency model, a blocking stat/open/read/write is a legitimate
//! suspension point and does not block other sessions, so they are called
//! directly here rather than funneled through `spawn_blocking`.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rs9p::srv::{FId, Filesystem};
use rs9p::*;
use tokio::sync::{Mutex, RwLock};

use crate::overlay::handlers::{self, OpenHandle};
use crate::overlay::merge::{list_dir, MergedEntry};
use crate::overlay::LayerStack;

/// Per-fid state: the upath this fid is currently bound to, and, once
/// opened, the live handle backing it.
#[derive(Default)]
pub struct OverlayFId {
    upath: RwLock<String>,
    open: Mutex<Option<OpenHandleState>>,
}

enum OpenHandleState {
    File(std::fs::File),
    Dir(Vec<MergedEntry>),
}

/// The overlay filesystem's 9P session handler. Holds the immutable layer
/// stack; all other state lives per-fid.
#[derive(Clone)]
pub struct OverlaySession {
    layers: Arc<LayerStack>,
}

impl OverlaySession {
    pub fn new(layers: LayerStack) -> Self {
        OverlaySession {
            layers: Arc::new(layers),
        }
    }
}

fn qid_for(stat: &handlers::Stat) -> Qid {
    Qid {
        typ: if stat.is_dir {
            QIdType::DIR
        } else {
            QIdType::FILE
        },
        version: 0,
        path: 0,
    }
}

fn map_err(e: crate::error::OverlayError) -> error::Error {
    use crate::error::OverlayError::*;
    match e {
        NotFound(msg) => {
            tracing::debug!(%msg, "not found");
            error::Error::No(error::errno::ENOENT)
        }
        IoFailure(io_err) => {
            tracing::warn!(error = %io_err, "io failure");
            error::Error::Io(io_err)
        }
        Unsupported(msg) => {
            tracing::debug!(%msg, "unsupported operation");
            error::Error::No(error::errno::EOPNOTSUPP)
        }
        InvalidRequest(msg) => {
            tracing::warn!(%msg, "invalid request");
            error::Error::No(error::errno::EINVAL)
        }
        Config(msg) => {
            tracing::error!(%msg, "config error surfaced at runtime");
            error::Error::No(error::errno::EIO)
        }
    }
}

#[async_trait]
impl Filesystem for OverlaySession {
    type FId = OverlayFId;

    async fn rattach(
        &self,
        fid: &FId<Self::FId>,
        _afid: Option<&FId<Self::FId>>,
        _uname: &str,
        _aname: &str,
        _n_uname: u32,
    ) -> Result<FCall> {
        *fid.aux.upath.write().await = "/".to_string();
        tracing::info!("session attached");
        Ok(FCall::RAttach {
            qid: Qid {
                typ: QIdType::DIR,
                version: 0,
                path: 0,
            },
        })
    }

    async fn rwalk(
        &self,
        fid: &FId<Self::FId>,
        newfid: &FId<Self::FId>,
        wnames: &[String],
    ) -> Result<FCall> {
        let base = fid.aux.upath.read().await.clone();
        tracing::trace!(base = %base, names = ?wnames, "rwalk");
        let mut upath = base;
        let mut wqids = Vec::with_capacity(wnames.len());

        for (i, name) in wnames.iter().enumerate() {
            let candidate = crate::overlay::path::join(&upath, name);
            match handlers::walk(&self.layers, &candidate) {
                Ok(st) => {
                    upath = candidate;
                    wqids.push(qid_for(&st));
                }
                Err(e) => {
                    if i == 0 {
                        return Err(map_err(e));
                    }
                    break;
                }
            }
        }

        *newfid.aux.upath.write().await = upath;
        Ok(FCall::RWalk { wqids })
    }

    async fn rgetattr(&self, fid: &FId<Self::FId>, req_mask: GetAttrMask) -> Result<FCall> {
        let upath = fid.aux.upath.read().await.clone();
        tracing::trace!(%upath, "rgetattr");
        let st = handlers::stat(&self.layers, &upath).map_err(map_err)?;
        Ok(FCall::RGetAttr {
            valid: req_mask,
            qid: qid_for(&st),
            stat: Stat {
                mode: st.mode,
                size: st.len,
                mtime: Time::from(st.mtime),
                ..Default::default()
            },
        })
    }

    async fn rsetattr(&self, fid: &FId<Self::FId>, valid: SetAttrMask, stat: &SetAttr) -> Result<FCall> {
        let upath = fid.aux.upath.read().await.clone();
        tracing::debug!(%upath, ?valid, "rsetattr");

        if valid.contains(SetAttrMask::MODE) {
            handlers::chmod(&self.layers, &upath, stat.mode).map_err(map_err)?;
        }
        if valid.intersects(SetAttrMask::UID | SetAttrMask::GID) {
            handlers::chown(&self.layers, &upath, stat.uid, stat.gid).map_err(map_err)?;
        }
        if valid.contains(SetAttrMask::SIZE) {
            handlers::truncate(&self.layers, &upath, stat.size).map_err(map_err)?;
        }
        if valid.intersects(SetAttrMask::ATIME_SET | SetAttrMask::MTIME_SET) {
            let now = SystemTime::now();
            let atime = if valid.contains(SetAttrMask::ATIME_SET) {
                SystemTime::UNIX_EPOCH + Duration::from_secs(stat.atime.sec as u64)
            } else {
                now
            };
            let mtime = if valid.contains(SetAttrMask::MTIME_SET) {
                SystemTime::UNIX_EPOCH + Duration::from_secs(stat.mtime.sec as u64)
            } else {
                now
            };
            handlers::utimes(&self.layers, &upath, atime, mtime).map_err(map_err)?;
        }

        Ok(FCall::RSetAttr)
    }

    async fn rreaddir(&self, fid: &FId<Self::FId>, off: u64, count: u32) -> Result<FCall> {
        let upath = fid.aux.upath.read().await.clone();
        let mut open = fid.aux.open.lock().await;
        if open.is_none() {
            let entries = list_dir(&self.layers, &upath).map_err(map_err)?;
            *open = Some(OpenHandleState::Dir(entries));
        }

        let entries = match open.as_ref() {
            Some(OpenHandleState::Dir(entries)) => entries,
            _ => return Err(map_err(crate::error::OverlayError::InvalidRequest(
                "fid is not a directory".to_string(),
            ))),
        };

        let mut data = DirEntryData::new();
        let mut size = 0u32;
        for (i, entry) in entries.iter().enumerate().skip(off as usize) {
            let dirent = DirEntry {
                qid: Qid {
                    typ: if entry.file_type.is_dir() { QIdType::DIR } else { QIdType::FILE },
                    version: 0,
                    path: 0,
                },
                offset: (i + 1) as u64,
                typ: 0,
                name: entry.name.to_string_lossy().into_owned(),
            };
            let entry_size = dirent.size();
            if size + entry_size > count {
                break;
            }
            size += entry_size;
            data.push(dirent);
        }

        Ok(FCall::RReadDir { data })
    }

    async fn rlopen(&self, fid: &FId<Self::FId>, flags: u32) -> Result<FCall> {
        let upath = fid.aux.upath.read().await.clone();
        let write = (flags & (libc::O_WRONLY as u32 | libc::O_RDWR as u32)) != 0;
        tracing::debug!(%upath, write, "rlopen");
        let handle = handlers::open(&self.layers, &upath, write).map_err(map_err)?;

        let qid = match &handle {
            OpenHandle::Dir(_) => Qid { typ: QIdType::DIR, version: 0, path: 0 },
            OpenHandle::File(_) => Qid { typ: QIdType::FILE, version: 0, path: 0 },
        };

        let mut open = fid.aux.open.lock().await;
        *open = Some(match handle {
            OpenHandle::File(f) => OpenHandleState::File(f),
            OpenHandle::Dir(entries) => OpenHandleState::Dir(entries),
        });

        Ok(FCall::RlOpen { qid, iounit: 0 })
    }

    async fn rlcreate(
        &self,
        fid: &FId<Self::FId>,
        name: &str,
        _flags: u32,
        mode: u32,
        _gid: u32,
    ) -> Result<FCall> {
        let parent = fid.aux.upath.read().await.clone();
        let upath = crate::overlay::path::join(&parent, name);
        tracing::debug!(%upath, mode, "rlcreate");
        let handle = handlers::create(&self.layers, &upath, false, mode).map_err(map_err)?;

        *fid.aux.upath.write().await = upath;
        let mut open = fid.aux.open.lock().await;
        *open = match handle {
            OpenHandle::File(f) => Some(OpenHandleState::File(f)),
            OpenHandle::Dir(_) => None,
        };

        Ok(FCall::RlCreate {
            qid: Qid { typ: QIdType::FILE, version: 0, path: 0 },
            iounit: 0,
        })
    }

    async fn rmkdir(&self, dfid: &FId<Self::FId>, name: &str, mode: u32, _gid: u32) -> Result<FCall> {
        let parent = dfid.aux.upath.read().await.clone();
        let upath = crate::overlay::path::join(&parent, name);
        tracing::debug!(%upath, mode, "rmkdir");
        handlers::create(&self.layers, &upath, true, mode).map_err(map_err)?;
        Ok(FCall::RMkDir {
            qid: Qid { typ: QIdType::DIR, version: 0, path: 0 },
        })
    }

    async fn rread(&self, fid: &FId<Self::FId>, offset: u64, count: u32) -> Result<FCall> {
        let mut open = fid.aux.open.lock().await;
        let file = match open.as_mut() {
            Some(OpenHandleState::File(f)) => f,
            _ => return Err(map_err(crate::error::OverlayError::InvalidRequest("fid has no open file".to_string()))),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; count as usize];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(FCall::RRead { data: Data(buf) })
    }

    async fn rwrite(&self, fid: &FId<Self::FId>, offset: u64, data: &Data) -> Result<FCall> {
        let mut open = fid.aux.open.lock().await;
        let file = match open.as_mut() {
            Some(OpenHandleState::File(f)) => f,
            _ => return Err(map_err(crate::error::OverlayError::InvalidRequest("fid has no open file".to_string()))),
        };
        file.seek(SeekFrom::Start(offset))?;
        let n = file.write(&data.0)?;
        Ok(FCall::RWrite { count: n as u32 })
    }

    async fn rrenameat(
        &self,
        olddir: &FId<Self::FId>,
        oldname: &str,
        _newdir: &FId<Self::FId>,
        newname: &str,
    ) -> Result<FCall> {
        let parent = olddir.aux.upath.read().await.clone();
        let upath = crate::overlay::path::join(&parent, oldname);
        tracing::debug!(%upath, newname, "rrenameat");
        handlers::rename(&self.layers, &upath, newname).map_err(map_err)?;
        Ok(FCall::RRenameAt)
    }

    async fn runlinkat(&self, dirfid: &FId<Self::FId>, name: &str, _flags: u32) -> Result<FCall> {
        let parent = dirfid.aux.upath.read().await.clone();
        let upath = crate::overlay::path::join(&parent, name);
        tracing::debug!(%upath, "runlinkat");
        handlers::remove(&self.layers, &upath).map_err(map_err)?;
        Ok(FCall::RUnlinkAt)
    }

    async fn rfsync(&self, _fid: &FId<Self::FId>) -> Result<FCall> {
        handlers::sync().map_err(map_err)?;
        Ok(FCall::RFSync)
    }

    async fn rclunk(&self, fid: &FId<Self::FId>) -> Result<FCall> {
        *fid.aux.open.lock().await = None;
        Ok(FCall::RClunk)
    }
}
