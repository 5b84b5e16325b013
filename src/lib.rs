//! Core library for the turret controller.
//!
//! Steers a pan/tilt turret toward a detected face. A per-frame detection is
//! turned into a pixel offset from the calibrated aim point, the offset into
//! rate-limited direction commands, and the commands travel over a serial
//! link that reconnects on demand when the microcontroller is unplugged.
//!
//! - [`tracking`]: offset computation and detection selection
//! - [`dispatch`]: dead zone, rate limit and direction mapping
//! - [`link`]: serial discovery, connection and best-effort writes
//! - [`controller`]: shared state and the operator control surface
//! - [`frame_loop`]: the paced producer loop with cooperative stop
//! - [`adapters`]: real and mock serial backends

pub mod adapters;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod frame_loop;
pub mod link;
pub mod tracking;
