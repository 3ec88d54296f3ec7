// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the update service.
///
/// The defaults are the values used on a deployed device; the command line
/// (and the tests) override individual fields.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub listen_addr: IpAddr,
    pub server_port: u16,
    /// Command argv run when an in-flight install is cancelled, telling the
    /// bootloader to keep booting the currently-active slot.
    pub override_cmds: Vec<String>,
    /// Command argv run to revert to the previously-active firmware slot.
    pub revert_cmds: Vec<String>,
    /// Command argv that installs the update; the image path is appended as
    /// the final argument.
    pub update_cmds: Vec<String>,
    /// Where the uploaded update image is written before installation.
    pub update_write_path: PathBuf,
    pub version_path: PathBuf,
    /// When false, the reboot state returns straight to ready instead of
    /// rebooting the device. Only meant for integration testing.
    pub reboot_after_update: bool,
    /// Shell command run to reboot; a single string because it is handed to
    /// `sh -c`. We expect to run as a non-root user, hence the sudo.
    pub reboot_cmd: String,
    pub reboot_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            server_port: 8080,
            override_cmds: to_argv(&["rauc", "status", "mark-active", "booted"]),
            revert_cmds: to_argv(&["rauc", "status", "mark-active", "other"]),
            update_cmds: to_argv(&["rauc", "install"]),
            update_write_path: PathBuf::from("/tmp/update.raucb"),
            version_path: PathBuf::from("/etc/version.json"),
            reboot_after_update: true,
            reboot_cmd: "sudo reboot".to_string(),
            reboot_delay: Duration::from_secs(2),
        }
    }
}

fn to_argv(cmds: &[&str]) -> Vec<String> {
    cmds.iter().map(|s| s.to_string()).collect()
}
