// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! On-board firmware update service.
//!
//! Accepts an update image over a local HTTP API, writes it to disk, hands it
//! to RAUC for installation, tracks installer progress and reboots into the
//! new firmware. Cancel, override and revert paths cover the cases where any
//! of those steps goes wrong.

pub mod configuration;
pub mod installer;
pub mod process;
pub mod runner;
pub mod server;
pub mod state_machine;
pub mod status;
