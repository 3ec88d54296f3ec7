// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Invocation of the external RAUC and reboot commands.

use std::io::{self, BufRead, BufReader};
use std::process::{Command, ExitStatus, Stdio};

/// Seam between the state machine and the external commands it drives, so
/// tests can substitute a scripted runner.
pub trait ProcessRunner {
    /// Runs the command to completion with inherited output.
    fn run(&self, argv: &[String]) -> io::Result<ExitStatus>;

    /// Runs the command with stdout and stderr merged into a single stream,
    /// calling `on_line` for every line as it arrives, then reaps the
    /// process. All lines are delivered before this returns, including any
    /// the process only flushes on exit.
    fn run_streaming(
        &self,
        argv: &[String],
        on_line: &mut dyn FnMut(&str),
    ) -> io::Result<ExitStatus>;
}

/// Runs commands via `std::process`.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> io::Result<ExitStatus> {
        command(argv)?.status()
    }

    fn run_streaming(
        &self,
        argv: &[String],
        on_line: &mut dyn FnMut(&str),
    ) -> io::Result<ExitStatus> {
        // RAUC writes most of its output to stdout but failure messages go
        // to stderr; funnel both into one pipe so they can be parsed as a
        // single stream, in emission order.
        let (reader, writer) = io::pipe()?;
        let mut cmd = command(argv)?;
        cmd.stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);

        let mut child = cmd.spawn()?;
        // The parent's copies of the pipe writer must be closed, or the
        // reader below never sees EOF.
        drop(cmd);

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            on_line(line.trim());
        }

        child.wait()
    }
}

fn command(argv: &[String]) -> io::Result<Command> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty command line")
    })?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_run_reports_exit_status() {
        let runner = SystemRunner;
        assert!(runner.run(&sh("exit 0")).unwrap().success());
        assert!(!runner.run(&sh("exit 3")).unwrap().success());
    }

    #[test]
    fn test_run_rejects_empty_argv() {
        let runner = SystemRunner;
        let err = runner.run(&[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_run_streaming_merges_stdout_and_stderr() {
        let runner = SystemRunner;
        let mut lines = Vec::new();
        let status = runner
            .run_streaming(&sh("echo one; echo two >&2; echo three"), &mut |line| {
                lines.push(line.to_string())
            })
            .unwrap();
        assert!(status.success());
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_run_streaming_delivers_lines_before_reporting_failure() {
        let runner = SystemRunner;
        let mut lines = Vec::new();
        let status = runner
            .run_streaming(&sh("echo 'LastError: Disk Full'; exit 1"), &mut |line| {
                lines.push(line.to_string())
            })
            .unwrap();
        assert!(!status.success());
        assert_eq!(lines, vec!["LastError: Disk Full"]);
    }

    #[test]
    fn test_run_streaming_missing_program_is_an_error() {
        let runner = SystemRunner;
        let result = runner.run_streaming(
            &["/nonexistent/no-such-program".to_string()],
            &mut |_| {},
        );
        assert!(result.is_err());
    }
}
