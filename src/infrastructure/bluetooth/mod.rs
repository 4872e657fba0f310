//! Bluetooth Module
//!
//! Acquires heart rate data from a BLE wearable exposing the standard Heart
//! Rate Service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 ReconnectionController                   │
//! │   (retry budget, operator overrides, connection state)   │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ one per attempt
//!                       ▼
//!               ┌───────────────┐
//!               │  Acquisition  │
//!               │    Session    │
//!               └───────┬───────┘
//!         ┌─────────────┼─────────────┐
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Transport  │  │ Protocol │
//! │ - device  │  │ - btleplug │  │ - UUIDs  │
//! │   choice  │  │ - link     │  │ - decode │
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Heart Rate Service UUIDs and measurement decoding
//! - [`scanner`] - Device classification and peripheral lookup
//! - [`connection`] - A single acquisition session
//! - [`service`] - Reconnection controller and its command handle
//! - [`transport`] - Transport traits the session is written against
//! - [`btleplug_transport`] - The btleplug implementation of those traits

pub mod btleplug_transport;
pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

#[cfg(test)]
pub mod mock;

pub use btleplug_transport::BtleplugTransport;
pub use service::{controller_channel, ControllerHandle, ReconnectionController};
