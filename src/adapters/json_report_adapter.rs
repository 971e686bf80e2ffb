//! JSON report adapter implementing ReportPort.
//!
//! Writes the whole [`RunReport`] as pretty-printed JSON. Non-finite floats
//! serialize as `null`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::error::WfoError;
use crate::domain::walk_forward::RunReport;
use crate::ports::report_port::ReportPort;

pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JsonReportAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, report: &RunReport, output_path: &str) -> Result<(), WfoError> {
        let path = Path::new(output_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(WfoError::Io)?;
        }

        let mut writer = BufWriter::new(File::create(path).map_err(WfoError::Io)?);
        serde_json::to_writer_pretty(&mut writer, report).map_err(|e| WfoError::Report {
            reason: e.to_string(),
        })?;
        writer.write_all(b"\n").map_err(WfoError::Io)?;
        writer.flush().map_err(WfoError::Io)?;

        Ok(())
    }
}
