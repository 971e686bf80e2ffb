//! Report output port trait.

use crate::domain::error::WfoError;
use crate::domain::walk_forward::RunReport;

/// Port for persisting a finished run. Reports are read-only consumers.
pub trait ReportPort {
    fn write(&self, report: &RunReport, output_path: &str) -> Result<(), WfoError>;
}
