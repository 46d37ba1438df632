//! Library half of the `draftloom` binary, so the commands can be exercised
//! from integration tests without spawning a process.

pub mod commands;
