//! Heart rate acquisition from BLE wearables.
//!
//! The [`infrastructure::bluetooth`] layer finds a device, subscribes to its
//! Heart Rate Measurement characteristic and keeps the link alive. Decoded
//! samples and status changes are published as [`domain::models::HrEvent`]s
//! for whatever sink the binary wires up.

pub mod domain;
pub mod infrastructure;
pub mod presentation;
