pub mod cli;
pub mod simulated;
