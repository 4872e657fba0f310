//! BLE Transport Seam
//!
//! The acquisition session talks to the radio only through these traits. The
//! production implementation lives in [`super::btleplug_transport`]; tests
//! drive the controller with a scripted implementation.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A peripheral seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralDescriptor<H> {
    /// Transport specific handle used to connect.
    pub handle: H,
    pub name: Option<String>,
    pub services: Vec<Uuid>,
    /// Stable across sessions for the same physical device.
    pub address: String,
}

impl<H> PeripheralDescriptor<H> {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter available")]
    NoAdapter,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("not subscribed")]
    NotSubscribed,
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
    #[error("{0}")]
    Other(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Discovery and connection entry points of a Bluetooth stack.
#[allow(async_fn_in_trait)]
pub trait BleTransport {
    type Handle: Clone;
    type Link: BleLink;

    /// Look up a single peripheral by address, giving up after `timeout`.
    async fn find_by_address(
        &self,
        address: &str,
        timeout: Duration,
    ) -> TransportResult<Option<PeripheralDescriptor<Self::Handle>>>;

    /// Unfiltered discovery pass. Results are in discovery order.
    async fn discover(
        &self,
        window: Duration,
    ) -> TransportResult<Vec<PeripheralDescriptor<Self::Handle>>>;

    /// Wait for the first peripheral advertising `service`.
    async fn await_service(
        &self,
        service: Uuid,
        timeout: Duration,
    ) -> TransportResult<Option<PeripheralDescriptor<Self::Handle>>>;

    async fn connect(
        &self,
        peripheral: &PeripheralDescriptor<Self::Handle>,
    ) -> TransportResult<Self::Link>;
}

/// A live connection to one peripheral.
#[allow(async_fn_in_trait)]
pub trait BleLink {
    async fn subscribe(&mut self, characteristic: Uuid) -> TransportResult<()>;

    /// Next notification payload of the subscribed characteristic, or `None`
    /// once the peripheral has disconnected.
    async fn next_notification(&mut self) -> Option<Vec<u8>>;

    async fn unsubscribe(&mut self, characteristic: Uuid) -> TransportResult<()>;

    async fn disconnect(&mut self) -> TransportResult<()>;
}
