// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::aggregator::FrequencyTable;
use crate::error::HarvestError;

#[cfg(unix)]
const REPORT_MODE: u32 = 0o644;

/// Persists the finished report.
pub trait ResultSink: Send + Sync {
    fn persist(&self, table: &FrequencyTable) -> Result<(), HarvestError>;
}

/// Serializes the table as a JSON object indented with four spaces.
pub fn to_pretty_json(table: &FrequencyTable) -> Result<Vec<u8>, HarvestError> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    table.serialize(&mut serializer)?;
    Ok(buf)
}

/// Writes the report to a file. The content is staged in a temporary file next
/// to the target and renamed into place, so a failed run never leaves a
/// truncated or partially written report behind.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileSink { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonFileSink {
    fn persist(&self, table: &FrequencyTable) -> Result<(), HarvestError> {
        let json = to_pretty_json(table)?;
        info!("Writing the results to {}", self.path.display());

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let sink_error =
            |e: std::io::Error| HarvestError::Sink(format!("{}: {e}", self.path.display()));

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(sink_error)?;
        // Staged files are created 0600.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            staged
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(REPORT_MODE))
                .map_err(sink_error)?;
        }
        staged.write_all(&json).map_err(sink_error)?;
        staged.flush().map_err(sink_error)?;
        staged
            .persist(&self.path)
            .map_err(|e| sink_error(e.error))?;
        Ok(())
    }
}
