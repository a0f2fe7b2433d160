pub mod extraction;
pub mod structuring;
pub mod table;
pub mod control; // Stage tracking + cancellation
pub mod processor; // Conversion orchestrator
