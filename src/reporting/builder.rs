//! Report builder contract

/// Report construction errors
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Construction failed; the report is discarded for this cycle
    #[error("report build failed: {0}")]
    Failed(String),
    /// Nothing was added since `new_report`
    #[error("no messages to report")]
    NoMessages,
}

/// Stateful accumulator folding a message stream into one report.
///
/// The reporter calls `new_report`, then `add_message` once per logged
/// message in log order, then `build_report`.
pub trait ReportBuilder: Send {
    type Message;
    type Report;

    /// Reset all accumulated state.
    fn new_report(&mut self);

    fn add_message(&mut self, message: &Self::Message) -> Result<(), BuildError>;

    fn build_report(&mut self) -> Result<Self::Report, BuildError>;
}
