// Copyright 2024 The Fuchsia Authors
//
// Licensed under a BSD-style license <LICENSE-BSD>, Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0>, or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to
// those terms.

//! Classification of `rauc install` output.

/// Turns the lines emitted so far by the installer into a short progress or
/// result summary for the status record's `rauc_state` field.
///
/// The classification only depends on the buffer contents, so it can be
/// re-run on every new line while the installer is running and once more
/// over the complete buffer after it exits. The exit code, not this text,
/// decides whether the install succeeded; this is diagnostic only.
pub fn install_status(lines: &[String]) -> String {
    let Some(last_line) = lines.last() else {
        return "in progress: starting".to_string();
    };

    // RAUC reports progress as "<percentage>% <step description>".
    if let Some((prefix, _)) = last_line.split_once('%') {
        return format!("in progress: {prefix}%");
    }

    if last_line.contains("succeeded") {
        return "success".to_string();
    }

    if !last_line.contains("failed") {
        return "in progress: pending".to_string();
    }

    // The last line says the install failed; look for the detail line RAUC
    // prints alongside it.
    for line in lines {
        if let Some(detail) = line.strip_prefix("LastError: ") {
            return format!("failed: {}", detail.to_lowercase());
        }
    }

    "failed".to_string()
}
