//! Application-level orchestration.
//!
//! This module owns server lifecycle dispatch (start/stop/restart) and the periodic
//! refresh of status and request log. UI layers send commands here and render the
//! events that come back.

mod controller;

pub(crate) use controller::{run_controller, ControllerOptions, UiCommand};
