// RowMon - Physics
//
// Stroke detection and rowing metrics from flywheel impulse intervals.

pub mod averager;
pub mod engine;
pub mod flank;

pub use engine::RowingEngine;
