//! Exit codes of the meshop binary

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// Any error
pub const ERROR: i32 = 1;

/// `manifest diff` found differences
pub const DIFFERENCES: i32 = 1;
