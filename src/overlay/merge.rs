//! Merged directory listings across the layer stack.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;

use crate::error::Result;
use crate::overlay::path;
use crate::overlay::resolver::LayerStack;
use crate::overlay::whiteout::Whiteout;

/// One entry in a merged directory listing.
#[derive(Debug, Clone)]
pub struct MergedEntry {
    pub name: OsString,
    pub file_type: fs::FileType,
}

/// Produces the merged listing of `upath` by overlaying every layer's raw
/// directory contents from deepest to shallowest, applying whiteouts as
/// they're encountered. Missing directories at a given depth are treated as
/// empty, not an error. Returned in name order (the overlay itself makes no
/// ordering guarantee; this is purely for deterministic wire output).
pub fn list_dir(layers: &LayerStack, upath: &str) -> Result<Vec<MergedEntry>> {
    let mut merged: BTreeMap<OsString, MergedEntry> = BTreeMap::new();

    for d in (0..layers.depth()).rev() {
        let dir_apath = layers.apath_at(upath, d);
        let read_dir = match fs::read_dir(&dir_apath) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        for entry in read_dir {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();

            if Whiteout::is_whiteout_marker(&name) {
                if let Some(target) = Whiteout::extract_target(&name) {
                    merged.remove(&target);
                }
                continue;
            }

            let entry_upath = path::join(upath, &name_str);
            if layers.has_whiteout(&entry_upath, d) {
                merged.remove(&name);
                continue;
            }

            merged.insert(
                name,
                MergedEntry {
                    name: entry.file_name(),
                    file_type: entry.file_type()?,
                },
            );
        }
    }

    Ok(merged.into_values().collect())
}
