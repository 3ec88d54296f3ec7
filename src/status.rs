// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The status record shared between the state runner thread and the HTTP
//! request handlers.

use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// The states of the update orchestration state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Ready,
    WritingUpdate,
    InstallingUpdate,
    Overriding,
    Failed,
    Reverting,
    Rebooting,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Ready => "ready",
            State::WritingUpdate => "writing_update",
            State::InstallingUpdate => "installing_update",
            State::Overriding => "overriding",
            State::Failed => "failed",
            State::Reverting => "reverting",
            State::Rebooting => "rebooting",
        };
        f.write_str(name)
    }
}

/// A snapshot of the service's externally visible state, returned verbatim
/// from GET /status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    /// Mirrors the state machine's current state at all times; it is updated
    /// before a state's entry action runs.
    pub state: State,
    /// Set each time the Failed state is entered, never cleared.
    pub last_error: Option<String>,
    /// Progress summary parsed from the RAUC install output; only meaningful
    /// while an install is running or just finished.
    pub rauc_state: String,
    /// Reported by the bootloader watchdog via POST /bootstate and stored
    /// verbatim.
    pub boot_state: String,
}

impl Status {
    fn new() -> Self {
        Status {
            state: State::Ready,
            last_error: None,
            rauc_state: String::new(),
            boot_state: String::new(),
        }
    }
}

/// Handle to the status record. Only the runner thread writes to it, one
/// field at a time, but the request handlers read it concurrently, so every
/// access goes through the lock and reads copy the whole record out.
#[derive(Clone, Debug)]
pub struct SharedStatus(Arc<Mutex<Status>>);

impl SharedStatus {
    pub fn new() -> Self {
        SharedStatus(Arc::new(Mutex::new(Status::new())))
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        // The runner loop must outlive any panicking reader.
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns an independent copy of the record; callers never observe a
    /// half-updated record or race with later writes.
    pub fn snapshot(&self) -> Status {
        self.lock().clone()
    }

    pub fn set_state(&self, state: State) {
        self.lock().state = state;
    }

    pub fn set_last_error(&self, error: String) {
        self.lock().last_error = Some(error);
    }

    pub fn set_rauc_state(&self, rauc_state: String) {
        self.lock().rauc_state = rauc_state;
    }

    pub fn set_boot_state(&self, boot_state: String) {
        self.lock().boot_state = boot_state;
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}
