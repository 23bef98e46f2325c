//! Best-effort solution output.
//!
//! `post` hands the converged state to an optional exporter.  Export
//! failures are logged and never abort the analysis.

use crate::types::AnalysisKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export rejected: {0}")]
    Rejected(String),
}

/// What an exporter receives for one scenario.
#[derive(Debug, Clone, Copy)]
pub struct SolutionView<'a> {
    pub scenario: &'a str,
    pub scenario_id: usize,
    pub kind: AnalysisKind,
    pub vars_per_node: usize,
    /// Node coordinates, 3 per node.
    pub nodes: &'a [f64],
    pub state: &'a [f64],
}

pub trait SolutionExporter: Send {
    fn export(&mut self, solution: &SolutionView<'_>) -> Result<(), ExportError>;
}

/// Writes one whitespace-separated line per node: coordinates then state.
#[derive(Debug)]
pub struct TextExporter<W> {
    writer: W,
}

impl<W: std::io::Write + Send> TextExporter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: std::io::Write + Send> SolutionExporter for TextExporter<W> {
    fn export(&mut self, solution: &SolutionView<'_>) -> Result<(), ExportError> {
        if solution.vars_per_node == 0 {
            return Err(ExportError::Rejected("layout has no state per node".into()));
        }
        writeln!(
            self.writer,
            "# scenario {} ({}) kind={}",
            solution.scenario, solution.scenario_id, solution.kind
        )?;
        for (xyz, vals) in solution
            .nodes
            .chunks_exact(3)
            .zip(solution.state.chunks_exact(solution.vars_per_node))
        {
            let mut line = format!("{:.9e} {:.9e} {:.9e}", xyz[0], xyz[1], xyz[2]);
            for v in vals {
                line.push_str(&format!(" {v:.9e}"));
            }
            writeln!(self.writer, "{line}")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
