//! Layer stack, whiteout shadow detection, and path resolution.

use std::fs;
use std::path::PathBuf;

use crate::overlay::path::{self, apath_at};
use crate::overlay::whiteout::Whiteout;

/// An ordered, immutable stack of backing directories. `layers[0]` is the
/// top (writable) layer; the rest are treated read-only.
#[derive(Debug, Clone)]
pub struct LayerStack {
    layers: Vec<PathBuf>,
}

/// The outcome of resolving a upath against a `LayerStack`: the host path it
/// would live at together with the depth it was found at, or `-1` (modeled
/// as `None`) if absent everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub apath: PathBuf,
    pub depth: Option<usize>,
}

impl LayerStack {
    pub fn new(layers: Vec<PathBuf>) -> Self {
        assert!(!layers.is_empty(), "layer stack must have at least one layer");
        LayerStack { layers }
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn top(&self) -> &std::path::Path {
        &self.layers[0]
    }

    pub fn layer(&self, depth: usize) -> &std::path::Path {
        &self.layers[depth]
    }

    pub fn apath_at(&self, upath: &str, depth: usize) -> PathBuf {
        apath_at(&self.layers[depth], upath)
    }

    /// True if some prefix of `upath` is whited-out at a depth `<= max_depth`.
    /// A whiteout on an ancestor directory hides the whole subtree below it;
    /// a whiteout on the leaf hides only that entry.
    pub fn has_whiteout(&self, upath: &str, max_depth: usize) -> bool {
        for prefix in path::prefixes(upath) {
            let parent_upath = path::parent(&prefix);
            let name = match path::basename(&prefix) {
                Some(n) => n,
                None => continue,
            };
            for d in 0..=max_depth {
                let marker = Whiteout::marker_name(std::ffi::OsStr::new(name));
                let candidate = self.apath_at(&parent_upath, d).join(marker);
                if candidate.exists() {
                    tracing::trace!(%prefix, depth = d, "has_whiteout: marker found");
                    return true;
                }
            }
        }
        false
    }

    /// Resolve `upath` to the shallowest layer that contains it, honoring
    /// whiteouts written at shallower depths.
    pub fn resolve(&self, upath: &str) -> Resolved {
        for d in 0..self.depth() {
            let apath = self.apath_at(upath, d);
            if fs::symlink_metadata(&apath).is_ok() {
                if d > 0 && self.has_whiteout(upath, d - 1) {
                    tracing::trace!(%upath, depth = d, "resolve: shadowed by whiteout above");
                    return Resolved {
                        apath: self.apath_at(upath, 0),
                        depth: None,
                    };
                }
                tracing::trace!(%upath, depth = d, "resolve: found");
                return Resolved {
                    apath,
                    depth: Some(d),
                };
            }
        }
        tracing::trace!(%upath, "resolve: not found in any layer");
        Resolved {
            apath: self.apath_at(upath, 0),
            depth: None,
        }
    }
}
