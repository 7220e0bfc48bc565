//! Client-side secure remote sessions: command execution, interactive shells
//! and file transfer over SSH.

pub mod remote;
