//! Server entrypoint: constructs the layer stack and serves it over 9P.

use std::path::PathBuf;

use rs9p::srv::srv_async;

use crate::error::{OverlayError, Result};
use crate::overlay::LayerStack;
use crate::session::OverlaySession;

/// Builds a `LayerStack` from the CLI's top-first positional arguments and
/// serves it at `addr` until the connection is closed.
pub async fn serve(addr: &str, layers: Vec<PathBuf>) -> Result<()> {
    for layer in &layers {
        if !layer.is_dir() {
            return Err(OverlayError::Config(format!(
                "layer path is not a directory: {}",
                layer.display()
            )));
        }
    }

    let stack = LayerStack::new(layers);
    tracing::info!(%addr, depth = stack.depth(), "starting overlay server");

    let session = OverlaySession::new(stack);
    srv_async(session, addr)
        .await
        .map_err(|e| OverlayError::IoFailure(std::io::Error::other(e.to_string())))
}
