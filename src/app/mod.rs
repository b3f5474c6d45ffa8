//! Application core — connectivity policy, zero direct I/O.
//!
//! This module contains the rules for keeping the dashboard online:
//! station credentials and reconnection, the broker session that follows
//! the station, and the glue the touch UI calls into.  All interaction
//! with the ESP-IDF stack happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable on the host.

pub mod dashboard;
pub mod events;
pub mod ports;
pub mod session;
pub mod station;
