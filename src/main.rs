// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

use anyhow::Context;
use argh::FromArgs;
use onboard_updater::configuration::Config;
use onboard_updater::process::SystemRunner;
use onboard_updater::runner::StateRunner;
use onboard_updater::server::UpdaterServer;
use std::fs::OpenOptions;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

#[derive(FromArgs)]
/// On-board firmware update service.
struct Args {
    /// which IP address to listen on; defaults to all interfaces
    #[argh(option)]
    listen_on: Option<IpAddr>,

    /// which port to serve on
    #[argh(option)]
    port: Option<u16>,

    /// command that installs an update image, as a JSON array of argv
    /// strings; the image path is appended as the final argument.
    /// Example: '["rauc", "install"]'
    #[argh(option, from_str_fn(parse_argv))]
    update_cmds: Option<Vec<String>>,

    /// command run when cancelling an in-flight install, as a JSON array of
    /// argv strings
    #[argh(option, from_str_fn(parse_argv))]
    override_cmds: Option<Vec<String>>,

    /// command run to revert to the other firmware slot, as a JSON array of
    /// argv strings
    #[argh(option, from_str_fn(parse_argv))]
    revert_cmds: Option<Vec<String>>,

    /// where to write the uploaded update image
    #[argh(option)]
    update_write_path: Option<PathBuf>,

    /// path of the firmware version file
    #[argh(option)]
    version_path: Option<PathBuf>,

    /// shell command used to reboot after a successful install
    #[argh(option)]
    reboot_cmd: Option<String>,

    /// seconds to wait before rebooting
    #[argh(option)]
    reboot_delay_secs: Option<u64>,

    /// if set, skip the reboot and return to ready instead; integration
    /// testing only
    #[argh(switch)]
    no_reboot: bool,

    /// append logs to this file instead of stderr
    #[argh(option)]
    log_path: Option<PathBuf>,
}

fn parse_argv(value: &str) -> Result<Vec<String>, String> {
    serde_json::from_str(value).map_err(|e| format!("parsing failed: {e:?}"))
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::default();
        if let Some(listen_on) = self.listen_on {
            config.listen_addr = listen_on;
        }
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(update_cmds) = self.update_cmds {
            config.update_cmds = update_cmds;
        }
        if let Some(override_cmds) = self.override_cmds {
            config.override_cmds = override_cmds;
        }
        if let Some(revert_cmds) = self.revert_cmds {
            config.revert_cmds = revert_cmds;
        }
        if let Some(update_write_path) = self.update_write_path {
            config.update_write_path = update_write_path;
        }
        if let Some(version_path) = self.version_path {
            config.version_path = version_path;
        }
        if let Some(reboot_cmd) = self.reboot_cmd {
            config.reboot_cmd = reboot_cmd;
        }
        if let Some(secs) = self.reboot_delay_secs {
            config.reboot_delay = Duration::from_secs(secs);
        }
        if self.no_reboot {
            config.reboot_after_update = false;
        }
        config
    }
}

fn init_logging(log_path: &Option<PathBuf>) -> Result<(), anyhow::Error> {
    match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file '{}'", path.display()))?;
            tracing_subscriber::fmt()
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => tracing_subscriber::fmt().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args: Args = argh::from_env();
    init_logging(&args.log_path)?;

    let config = args.into_config();
    let addr = SocketAddr::new(config.listen_addr, config.server_port);

    // The state runner gets a worker thread of its own; it owns all the
    // blocking work (file writes, subprocesses, the pre-reboot sleep).
    let (runner, handle) = StateRunner::new(config, SystemRunner);
    thread::Builder::new()
        .name("state-runner".to_string())
        .spawn(move || runner.run())
        .context("spawning the state runner thread")?;

    let (local_addr, task) = UpdaterServer::start(handle, addr).await?;
    info!("listening on {local_addr}");

    task.await?;
    Ok(())
}
