// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The trigger queue and its single consumer loop.
//!
//! All triggers — from the HTTP request handlers and from the state
//! machine's own continuations — pass through one queue with one consumer,
//! so exactly one state transition is in flight at any time.

use crate::configuration::Config;
use crate::process::ProcessRunner;
use crate::state_machine::{transition, InvalidTransition, Model, Trigger};
use crate::status::{SharedStatus, Status};
use std::fs;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::error;

/// How long the runner loop idles between queue checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cached contents of the firmware version file, read once at runner start.
/// Empty means the read failed and the version is unavailable.
#[derive(Clone, Debug, Default)]
struct VersionCache(Arc<Mutex<String>>);

impl VersionCache {
    fn get(&self) -> String {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, version: String) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = version;
    }
}

/// The request-side view of the service: status and version snapshots plus
/// guard-checked trigger posting. Cheap to clone; the HTTP handlers get one
/// per request.
#[derive(Clone, Debug)]
pub struct UpdaterHandle {
    status: SharedStatus,
    version: VersionCache,
    triggers: Sender<Trigger>,
}

impl UpdaterHandle {
    pub fn status(&self) -> Status {
        self.status.snapshot()
    }

    /// The version file contents, or `None` if it could not be read at
    /// startup.
    pub fn version(&self) -> Option<String> {
        let version = self.version.get();
        if version.is_empty() {
            None
        } else {
            Some(version)
        }
    }

    pub fn post_update(&self, image: Vec<u8>) -> Result<(), InvalidTransition> {
        self.post_checked(Trigger::Update(image))
    }

    pub fn post_cancel(&self) -> Result<(), InvalidTransition> {
        self.post_checked(Trigger::Cancel)
    }

    pub fn post_revert(&self) -> Result<(), InvalidTransition> {
        self.post_checked(Trigger::Revert)
    }

    /// Stores the boot state reported by the bootloader watchdog. An empty
    /// body is not an error; it lets the client clear the state out.
    pub fn post_boot_state(&self, boot_state: String) {
        self.status.set_boot_state(boot_state);
    }

    /// Rejects the trigger if it is invalid for the current state, otherwise
    /// queues it. The check is not atomic with the runner's dequeue: another
    /// trigger can change the state in between, in which case the runner
    /// logs and drops this one.
    fn post_checked(&self, trigger: Trigger) -> Result<(), InvalidTransition> {
        let state = self.status.snapshot().state;
        let kind = trigger.kind();
        if transition(state, kind).is_none() {
            return Err(InvalidTransition { state, trigger: kind });
        }
        // Send can only fail once the runner loop is gone, at teardown.
        let _ = self.triggers.send(trigger);
        Ok(())
    }
}

/// Owns the trigger queue's receiving end and the state machine model, and
/// runs them on a dedicated thread.
pub struct StateRunner<R> {
    config: Config,
    model: Model<R>,
    triggers: Receiver<Trigger>,
    version: VersionCache,
}

impl<R: ProcessRunner> StateRunner<R> {
    pub fn new(config: Config, process: R) -> (Self, UpdaterHandle) {
        let status = SharedStatus::new();
        let version = VersionCache::default();
        let (sender, receiver) = mpsc::channel();
        let model = Model::new(config.clone(), process, status.clone(), sender.clone());
        let handle = UpdaterHandle {
            status,
            version: version.clone(),
            triggers: sender,
        };
        let runner = StateRunner { config, model, triggers: receiver, version };
        (runner, handle)
    }

    /// The consumer loop. Processes one trigger at a time, blocking on
    /// whatever its entry action does; invalid triggers are logged and
    /// dropped, never fatal.
    pub fn run(mut self) {
        // Reading the version isn't a state, just a oneshot at startup.
        self.read_version();

        loop {
            match self.triggers.try_recv() {
                Ok(trigger) => {
                    if let Err(err) = self.model.handle_trigger(trigger) {
                        error!("{err}");
                    }
                }
                Err(TryRecvError::Empty) => {
                    // The common case. If any state ever needs a periodic
                    // "tick" trigger, this is where to inject it.
                }
                // All handles dropped; only happens in tests.
                Err(TryRecvError::Disconnected) => break,
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn read_version(&self) {
        match fs::read_to_string(&self.config.version_path) {
            Ok(version) => self.version.set(version),
            Err(err) => error!(
                "unable to read version file at '{}': {err}",
                self.config.version_path.display()
            ),
        }
    }
}
