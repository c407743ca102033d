//! Market engine: expiry scan, settlement sweep and the scheduler that
//! drives both.

pub mod scanner;
pub mod scheduler;
pub mod settlement;
