pub mod api;
pub mod cli;
pub mod config;
pub mod git;
pub mod intervention;
pub mod log;
pub mod monitor;
pub mod notify;
pub mod outcome;
pub mod paths;
pub mod process;
pub mod scan;
pub mod shell_completion;
