use std::path::PathBuf;

use clap::Parser;

use crate::error::{OverlayError, Result};

#[derive(Parser, Debug)]
#[command(name = "overlayd")]
#[command(about = "Serve a layered directory stack as a union filesystem over 9P")]
pub struct Args {
    /// Address to listen on.
    #[arg(short = 'a', long = "addr", default_value = ":8888")]
    pub addr: String,

    /// Trace 9P messages.
    #[arg(short = 'D', long = "debug")]
    pub debug: bool,

    /// Print extra info.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Backing layer directories, top layer first.
    #[arg(required = true, num_args = 1..)]
    pub layers: Vec<PathBuf>,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.layers.len() < 2 {
            return Err(OverlayError::Config(
                "at least two layer directories are required (top first)".to_string(),
            ));
        }
        Ok(())
    }
}
