pub mod dop;
pub mod execution;
