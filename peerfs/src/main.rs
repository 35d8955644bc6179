// Copyright (C) 2024 rk8s authors
// SPDX-License-Identifier: MIT OR Apache-2.0

#[macro_use]
extern crate log;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use tokio::signal;

use peerfs::PeerFs;
use peerfs::config::{Args, Config};
use peerfs::fuse::mount::{MountPoint, mount_peerfs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let config = Config::from_args(args).context("invalid configuration")?;
    let mount_point = match &config.mountpoint {
        Some(path) => MountPoint::existing(path),
        None => MountPoint::temporary(),
    }
    .context("failed to prepare mount point")?;

    info!(
        "seeding {} manifest entries, shadow directory {:?}",
        config.manifest.len(),
        config.shadow.name
    );
    let fs = PeerFs::new(config.manifest, config.shadow);
    let mut mount_handle = mount_peerfs(fs, mount_point.path(), config.unprivileged)
        .await
        .context("mount failed, ensure FUSE (fusermount3) is available")?;

    info!("mounted on {}", mount_point.path().display());
    info!(
        "unmount with Ctrl+C or 'fusermount3 -u {}'",
        mount_point.path().display()
    );

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => res.context("fuse session ended with an error")?,
        _ = signal::ctrl_c() => {
            info!("unmounting {}", mount_point.path().display());
            mount_handle.unmount().await.context("unmount failed")?;
        }
    }
    Ok(())
}
