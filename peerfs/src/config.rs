// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;

use clap::Parser;

use crate::error::SetupError;
use crate::manifest::Manifest;
use crate::vfs::{DEFAULT_SHADOW_DIR, ShadowConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Mount a manifest-seeded in-memory tree whose file creation is gated by a shadow directory"
)]
pub struct Args {
    /// Mount point; a fresh temporary directory is used when omitted
    #[arg(long, env = "PEERFS_MOUNTPOINT")]
    pub mountpoint: Option<PathBuf>,
    /// JSON object mapping slash-separated paths to file contents
    #[arg(long, env = "PEERFS_MANIFEST")]
    pub manifest: Option<PathBuf>,
    /// Name of the shadow directory under the root
    #[arg(long, default_value = DEFAULT_SHADOW_DIR)]
    pub shadow_dir: String,
    /// Extra name to admit through the shadow directory (repeatable)
    #[arg(long = "admit")]
    pub admit: Vec<String>,
    /// Use privileged mount instead of unprivileged (fusermount3)
    #[arg(long, default_value_t = false)]
    pub privileged: bool,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Debug)]
pub struct Config {
    pub mountpoint: Option<PathBuf>,
    pub manifest: Manifest,
    pub shadow: ShadowConfig,
    pub unprivileged: bool,
    pub debug: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, SetupError> {
        let manifest = match &args.manifest {
            Some(path) => Manifest::load(path)?,
            None => Manifest::builtin(),
        };
        validate_name(&args.shadow_dir)?;
        for name in &args.admit {
            validate_name(name)?;
        }
        Ok(Self {
            mountpoint: args.mountpoint,
            manifest,
            shadow: ShadowConfig {
                name: args.shadow_dir,
                admitted: args.admit,
            },
            unprivileged: !args.privileged,
            debug: args.debug,
        })
    }
}

fn validate_name(name: &str) -> Result<(), SetupError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(SetupError::InvalidName(name.to_string()));
    }
    Ok(())
}
