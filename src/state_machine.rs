// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! The update orchestration state machine.
//!
//! Work happens in a state's entry action, which runs on the state runner
//! thread and blocks until done. An entry action dictates what happens next
//! by posting a follow-up trigger back onto the runner's queue, so no two
//! transitions are ever in flight at once.

use crate::configuration::Config;
use crate::installer::install_status;
use crate::process::ProcessRunner;
use crate::status::{SharedStatus, State};
use std::fmt;
use std::fs;
use std::sync::mpsc::Sender;
use std::thread;
use thiserror::Error;
use tracing::{error, warn};

/// A named event, optionally carrying a payload, that may cause a state
/// transition. Triggers come from the HTTP request handlers (`Update`,
/// `Cancel`, `Revert`) and from entry actions reporting their own outcome.
#[derive(Debug, PartialEq, Eq)]
pub enum Trigger {
    Update(Vec<u8>),
    Cancel,
    Revert,
    WriteUpdateSuccess,
    WriteUpdateFailed(String),
    RaucUpdateSuccess,
    RaucUpdateFailed(String),
    RaucOverrideSuccess,
    RaucOverrideFailed(String),
    RaucRevertSuccess,
    RaucRevertFailed(String),
    ReturnToReady,
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Update(_) => TriggerKind::Update,
            Trigger::Cancel => TriggerKind::Cancel,
            Trigger::Revert => TriggerKind::Revert,
            Trigger::WriteUpdateSuccess => TriggerKind::WriteUpdateSuccess,
            Trigger::WriteUpdateFailed(_) => TriggerKind::WriteUpdateFailed,
            Trigger::RaucUpdateSuccess => TriggerKind::RaucUpdateSuccess,
            Trigger::RaucUpdateFailed(_) => TriggerKind::RaucUpdateFailed,
            Trigger::RaucOverrideSuccess => TriggerKind::RaucOverrideSuccess,
            Trigger::RaucOverrideFailed(_) => TriggerKind::RaucOverrideFailed,
            Trigger::RaucRevertSuccess => TriggerKind::RaucRevertSuccess,
            Trigger::RaucRevertFailed(_) => TriggerKind::RaucRevertFailed,
            Trigger::ReturnToReady => TriggerKind::ReturnToReady,
        }
    }

    /// The error description carried by the failure triggers.
    fn into_message(self) -> Option<String> {
        match self {
            Trigger::WriteUpdateFailed(msg)
            | Trigger::RaucUpdateFailed(msg)
            | Trigger::RaucOverrideFailed(msg)
            | Trigger::RaucRevertFailed(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Payload-free mirror of [`Trigger`], used for transition lookups and
/// logging.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    Update,
    Cancel,
    Revert,
    WriteUpdateSuccess,
    WriteUpdateFailed,
    RaucUpdateSuccess,
    RaucUpdateFailed,
    RaucOverrideSuccess,
    RaucOverrideFailed,
    RaucRevertSuccess,
    RaucRevertFailed,
    ReturnToReady,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TriggerKind::Update => "update",
            TriggerKind::Cancel => "cancel",
            TriggerKind::Revert => "revert",
            TriggerKind::WriteUpdateSuccess => "write_update_success",
            TriggerKind::WriteUpdateFailed => "write_update_failed",
            TriggerKind::RaucUpdateSuccess => "rauc_update_success",
            TriggerKind::RaucUpdateFailed => "rauc_update_failed",
            TriggerKind::RaucOverrideSuccess => "rauc_override_success",
            TriggerKind::RaucOverrideFailed => "rauc_override_failed",
            TriggerKind::RaucRevertSuccess => "rauc_revert_success",
            TriggerKind::RaucRevertFailed => "rauc_revert_failed",
            TriggerKind::ReturnToReady => "return_to_ready",
        };
        f.write_str(name)
    }
}

/// The transition table: destination state for a trigger in a source state,
/// or `None` if the trigger is invalid there.
pub fn transition(state: State, trigger: TriggerKind) -> Option<State> {
    use State::*;
    use TriggerKind::*;
    match (state, trigger) {
        (Ready, Update) => Some(WritingUpdate),
        (Ready, Revert) => Some(Reverting),
        (WritingUpdate, WriteUpdateSuccess) => Some(InstallingUpdate),
        (WritingUpdate, WriteUpdateFailed) => Some(Failed),
        (WritingUpdate, Cancel) => Some(Ready),
        // Cancelling mid-install has to tell the bootloader to keep the
        // currently-active slot before going back to idle.
        (InstallingUpdate, Cancel) => Some(Overriding),
        (InstallingUpdate, RaucUpdateSuccess) => Some(Rebooting),
        (InstallingUpdate, RaucUpdateFailed) => Some(Failed),
        (Overriding, RaucOverrideSuccess) => Some(Ready),
        (Overriding, RaucOverrideFailed) => Some(Failed),
        (Failed, Update) => Some(WritingUpdate),
        (Reverting, RaucRevertSuccess) => Some(Rebooting),
        (Reverting, RaucRevertFailed) => Some(Failed),
        // Only reachable with reboot_after_update disabled; a real device
        // reboots out of the Rebooting state instead.
        (Rebooting, ReturnToReady) => Some(Ready),
        _ => None,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no transition for trigger '{trigger}' from state '{state}'")]
pub struct InvalidTransition {
    pub state: State,
    pub trigger: TriggerKind,
}

/// The state machine model. Holds the current state, performs entry actions
/// and posts their outcome triggers back to the runner's queue.
///
/// Only the state runner thread calls into the model, so it needs no locking
/// of its own; the shared status record carries everything concurrent
/// readers may see.
pub struct Model<R> {
    config: Config,
    process: R,
    status: SharedStatus,
    triggers: Sender<Trigger>,
    state: State,
}

impl<R: ProcessRunner> Model<R> {
    pub fn new(
        config: Config,
        process: R,
        status: SharedStatus,
        triggers: Sender<Trigger>,
    ) -> Self {
        Model { config, process, status, triggers, state: State::Ready }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Applies one trigger: looks up the transition, publishes the new state
    /// and runs the entry action to completion. Returns an error, leaving
    /// the state untouched, if the trigger is invalid for the current state.
    pub fn handle_trigger(&mut self, trigger: Trigger) -> Result<(), InvalidTransition> {
        let kind = trigger.kind();
        let dest = transition(self.state, kind)
            .ok_or(InvalidTransition { state: self.state, trigger: kind })?;

        self.state = dest;
        // Publish before the entry action so concurrent status reads see the
        // new state even while the action blocks.
        self.status.set_state(dest);

        match dest {
            State::Ready => {}
            State::WritingUpdate => {
                if let Trigger::Update(image) = trigger {
                    self.on_enter_writing_update(&image);
                }
            }
            State::InstallingUpdate => self.on_enter_installing_update(),
            State::Overriding => self.on_enter_overriding(),
            State::Failed => {
                if let Some(message) = trigger.into_message() {
                    self.status.set_last_error(message);
                }
            }
            State::Reverting => self.on_enter_reverting(),
            State::Rebooting => self.on_enter_rebooting(),
        }

        Ok(())
    }

    fn post(&self, trigger: Trigger) {
        if self.triggers.send(trigger).is_err() {
            warn!("trigger queue receiver is gone; dropping trigger");
        }
    }

    fn on_enter_writing_update(&self, image: &[u8]) {
        let path = &self.config.update_write_path;
        match fs::write(path, image) {
            Ok(()) => self.post(Trigger::WriteUpdateSuccess),
            Err(err) => {
                error!("unable to write update image to '{}': {err}", path.display());
                self.post(Trigger::WriteUpdateFailed(
                    "unable to write update file".to_string(),
                ));
            }
        }
    }

    fn on_enter_installing_update(&self) {
        let mut argv = self.config.update_cmds.clone();
        argv.push(self.config.update_write_path.to_string_lossy().into_owned());

        let mut lines: Vec<String> = Vec::new();
        let status = self.status.clone();
        let result = self.process.run_streaming(&argv, &mut |line| {
            lines.push(line.to_string());
            status.set_rauc_state(install_status(&lines));
        });

        // One final pass over the complete buffer; it covers output the
        // installer only flushed on exit.
        let summary = install_status(&lines);
        self.status.set_rauc_state(summary.clone());

        match result {
            Ok(exit) if exit.success() => self.post(Trigger::RaucUpdateSuccess),
            Ok(_) => {
                error!("error with RAUC update; {summary}");
                self.post(Trigger::RaucUpdateFailed(
                    "error trying to install update".to_string(),
                ));
            }
            Err(err) => {
                error!("unable to run the RAUC install command: {err}");
                self.post(Trigger::RaucUpdateFailed(
                    "error trying to install update".to_string(),
                ));
            }
        }
    }

    fn on_enter_overriding(&self) {
        match self.process.run(&self.config.override_cmds) {
            Ok(exit) if exit.success() => self.post(Trigger::RaucOverrideSuccess),
            Ok(_) => self.post(Trigger::RaucOverrideFailed(
                "error trying to override update".to_string(),
            )),
            Err(err) => {
                error!("unable to run the RAUC override command: {err}");
                self.post(Trigger::RaucOverrideFailed(
                    "error trying to override update".to_string(),
                ));
            }
        }
    }

    fn on_enter_reverting(&self) {
        match self.process.run(&self.config.revert_cmds) {
            Ok(exit) if exit.success() => self.post(Trigger::RaucRevertSuccess),
            Ok(_) => self.post(Trigger::RaucRevertFailed(
                "error trying to revert to the other firmware".to_string(),
            )),
            Err(err) => {
                error!("unable to run the RAUC revert command: {err}");
                self.post(Trigger::RaucRevertFailed(
                    "error trying to revert to the other firmware".to_string(),
                ));
            }
        }
    }

    fn on_enter_rebooting(&self) {
        thread::sleep(self.config.reboot_delay);

        if !self.config.reboot_after_update {
            // Integration-test configuration; skip the reboot and make the
            // service usable again.
            self.post(Trigger::ReturnToReady);
            return;
        }

        // Process-terminal under normal configuration: the host OS tears
        // this service down along with everything else.
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            self.config.reboot_cmd.clone(),
        ];
        if let Err(err) = self.process.run(&argv) {
            error!("unable to run the reboot command: {err}");
        }
    }
}
