pub mod cli;
pub mod config;
pub mod events;
pub mod input;
pub mod logging;
pub mod output;
pub mod result;
pub mod status;
pub mod storage;
pub mod supervisor;
pub mod tasks;
pub mod tool_log;
pub mod worker;
