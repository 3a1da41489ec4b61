//! xena-test-utils: Test infrastructure for the chassis client.
//!
//! Provides:
//! - ChassisEmulator: in-process TCP chassis speaking the line protocol
//! - ScriptedApi: in-memory backend with stubbed replies and a command log

mod emulator;
mod scripted_api;

pub use emulator::ChassisEmulator;
pub use scripted_api::ScriptedApi;
