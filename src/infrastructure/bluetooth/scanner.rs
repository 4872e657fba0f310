//! BLE Scanner Module
//!
//! Picks the peripheral an acquisition session connects to.

use crate::domain::models::{HrEvent, StatusMessage};
use crate::domain::retry::ScanTarget;
use crate::domain::settings::SessionTiming;
use crate::infrastructure::bluetooth::protocol::HEART_RATE_SERVICE_UUID;
use crate::infrastructure::bluetooth::transport::{
    BleTransport, PeripheralDescriptor, TransportError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lower-case name fragments of wearables known to expose heart rate.
pub const VENDOR_NAME_PATTERNS: &[&str] = &["miband", "mi band", "xiaomi"];

/// Whether a discovered peripheral looks like a heart rate sensor.
pub fn is_candidate<H>(descriptor: &PeripheralDescriptor<H>) -> bool {
    if descriptor.services.contains(&HEART_RATE_SERVICE_UUID) {
        return true;
    }
    descriptor.name.as_deref().is_some_and(|name| {
        let name = name.to_lowercase();
        VENDOR_NAME_PATTERNS
            .iter()
            .any(|pattern| name.contains(pattern))
    })
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("last device {0} not found")]
    AddressNotFound(String),
    #[error("no heart rate device found")]
    NotFound,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Locates peripherals for one acquisition attempt.
pub struct BleScanner<'a, T> {
    transport: &'a T,
    event_sender: mpsc::UnboundedSender<HrEvent>,
    timing: SessionTiming,
}

impl<'a, T: BleTransport> BleScanner<'a, T> {
    pub fn new(
        transport: &'a T,
        event_sender: mpsc::UnboundedSender<HrEvent>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            transport,
            event_sender,
            timing,
        }
    }

    /// Resolve `target` to a peripheral.
    pub async fn locate(
        &self,
        target: &ScanTarget,
    ) -> Result<PeripheralDescriptor<T::Handle>, ScanError> {
        match target {
            ScanTarget::KnownAddress(address) => self.locate_known(address).await,
            ScanTarget::DiscoverFresh => self.discover_fresh().await,
        }
    }

    async fn locate_known(
        &self,
        address: &str,
    ) -> Result<PeripheralDescriptor<T::Handle>, ScanError> {
        info!("Trying last connected device: {}", address);
        self.send_status(format!("Trying last device: {address}"));

        match self
            .transport
            .find_by_address(address, self.timing.known_address_timeout)
            .await
        {
            Ok(Some(device)) => Ok(device),
            Ok(None) => Err(ScanError::AddressNotFound(address.to_string())),
            Err(e) => {
                warn!("Lookup of {} failed: {}", address, e);
                Err(e.into())
            }
        }
    }

    async fn discover_fresh(&self) -> Result<PeripheralDescriptor<T::Handle>, ScanError> {
        info!("Starting discovery pass");
        self.send_status("Scanning for heart rate devices...");

        let devices = self
            .transport
            .discover(self.timing.discovery_window)
            .await?;
        debug!("Discovery returned {} devices", devices.len());

        if let Some(device) = devices.into_iter().find(is_candidate) {
            self.announce(&device);
            return Ok(device);
        }

        info!("No candidate advertising yet, waiting for heart rate service");
        self.send_status("No heart rate device found yet, scanning for heart rate service...");

        match self
            .transport
            .await_service(HEART_RATE_SERVICE_UUID, self.timing.filtered_scan_timeout)
            .await
        {
            Ok(Some(device)) => {
                self.announce(&device);
                Ok(device)
            }
            Ok(None) => {
                warn!("No heart rate device found");
                self.send_status("No device found");
                Err(ScanError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn announce(&self, device: &PeripheralDescriptor<T::Handle>) {
        info!("Found device: {} [{}]", device.display_name(), device.address);
        self.send_status(format!(
            "Found device: {} [{}]",
            device.display_name(),
            device.address
        ));
    }

    fn send_status(&self, message: impl Into<String>) {
        let _ = self
            .event_sender
            .send(HrEvent::StatusChanged(StatusMessage::info(message)));
    }
}
