//! btleplug backed transport.
//!
//! Discovery listens on the adapter's central event stream so results keep
//! the order in which peripherals were first seen.

use crate::infrastructure::bluetooth::transport::{
    BleLink, BleTransport, PeripheralDescriptor, TransportError, TransportResult,
};
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

type EventStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

pub struct BtleplugTransport {
    adapter: Adapter,
    connect_timeout: Duration,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter of the system.
    pub async fn new(connect_timeout: Duration) -> TransportResult<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        Ok(Self {
            adapter,
            connect_timeout,
        })
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
    }

    /// Scan with `filter` until a peripheral satisfies `accept` or `timeout`
    /// elapses.
    async fn scan_until(
        &self,
        filter: ScanFilter,
        timeout: Duration,
        accept: impl Fn(&PeripheralDescriptor<Peripheral>) -> bool,
    ) -> TransportResult<Option<PeripheralDescriptor<Peripheral>>> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(filter).await?;

        let found = tokio::time::timeout(timeout, self.first_match(events, &accept)).await;
        self.stop_scan().await;

        match found {
            Ok(result) => result,
            Err(_) => {
                debug!("Scan gave up after {:?}", timeout);
                Ok(None)
            }
        }
    }

    async fn first_match(
        &self,
        mut events: EventStream,
        accept: &impl Fn(&PeripheralDescriptor<Peripheral>) -> bool,
    ) -> TransportResult<Option<PeripheralDescriptor<Peripheral>>> {
        // Peripherals the adapter already knows about.
        for peripheral in self.adapter.peripherals().await? {
            if let Some(device) = describe(peripheral).await {
                if accept(&device) {
                    return Ok(Some(device));
                }
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ServicesAdvertisement { id, .. } => id,
                _ => continue,
            };
            let peripheral = self.adapter.peripheral(&id).await?;
            if let Some(device) = describe(peripheral).await {
                if accept(&device) {
                    return Ok(Some(device));
                }
            }
        }
        Ok(None)
    }
}

impl BleTransport for BtleplugTransport {
    type Handle = Peripheral;
    type Link = BtleplugLink;

    async fn find_by_address(
        &self,
        address: &str,
        timeout: Duration,
    ) -> TransportResult<Option<PeripheralDescriptor<Peripheral>>> {
        self.scan_until(ScanFilter::default(), timeout, |device| {
            device.address.eq_ignore_ascii_case(address)
        })
        .await
    }

    async fn discover(&self, window: Duration) -> TransportResult<Vec<PeripheralDescriptor<Peripheral>>> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let mut order: Vec<PeripheralId> = Vec::new();
        let _ = tokio::time::timeout(window, async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) = event {
                    if !order.contains(&id) {
                        order.push(id);
                    }
                }
            }
        })
        .await;
        self.stop_scan().await;

        // Cached peripherals that did not re-announce themselves go last.
        let mut peripherals = Vec::new();
        for id in &order {
            peripherals.push(self.adapter.peripheral(id).await?);
        }
        for peripheral in self.adapter.peripherals().await? {
            if !order.contains(&peripheral.id()) {
                peripherals.push(peripheral);
            }
        }

        let mut devices = Vec::new();
        for peripheral in peripherals {
            if let Some(device) = describe(peripheral).await {
                debug!(
                    "Discovered {} [{}] services: {:?}",
                    device.display_name(),
                    device.address,
                    device.services
                );
                devices.push(device);
            }
        }
        Ok(devices)
    }

    async fn await_service(
        &self,
        service: Uuid,
        timeout: Duration,
    ) -> TransportResult<Option<PeripheralDescriptor<Peripheral>>> {
        let filter = ScanFilter {
            services: vec![service],
        };
        self.scan_until(filter, timeout, |device| device.services.contains(&service))
            .await
    }

    async fn connect(&self, device: &PeripheralDescriptor<Peripheral>) -> TransportResult<BtleplugLink> {
        let peripheral = device.handle.clone();

        tokio::time::timeout(self.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;
        peripheral.discover_services().await?;
        debug!(
            "Discovered {} characteristics on {}",
            peripheral.characteristics().len(),
            device.address
        );

        let notifications = peripheral.notifications().await?;
        let events = self.adapter.events().await?;

        Ok(BtleplugLink {
            id: peripheral.id(),
            peripheral,
            notifications: Some(notifications),
            events: Some(events),
            subscribed: None,
        })
    }
}

/// Read the advertised properties of `peripheral`.
async fn describe(peripheral: Peripheral) -> Option<PeripheralDescriptor<Peripheral>> {
    let properties = peripheral.properties().await.ok().flatten()?;
    // Platforms that hide the MAC report a zero address; fall back to the id.
    let address = if properties.address == BDAddr::default() {
        peripheral.id().to_string()
    } else {
        properties.address.to_string()
    };
    Some(PeripheralDescriptor {
        handle: peripheral,
        name: properties.local_name,
        services: properties.services,
        address,
    })
}

pub struct BtleplugLink {
    peripheral: Peripheral,
    id: PeripheralId,
    notifications: Option<NotificationStream>,
    events: Option<EventStream>,
    subscribed: Option<Characteristic>,
}

enum LinkStep {
    Notification(Option<ValueNotification>),
    Central(Option<CentralEvent>),
}

async fn next_or_pending<S: Stream + Unpin>(stream: &mut Option<S>) -> Option<S::Item> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl BleLink for BtleplugLink {
    async fn subscribe(&mut self, characteristic: Uuid) -> TransportResult<()> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))?;
        self.peripheral.subscribe(&target).await?;
        self.subscribed = Some(target);
        Ok(())
    }

    async fn next_notification(&mut self) -> Option<Vec<u8>> {
        loop {
            let step = tokio::select! {
                n = next_or_pending(&mut self.notifications) => LinkStep::Notification(n),
                e = next_or_pending(&mut self.events) => LinkStep::Central(e),
            };
            match step {
                LinkStep::Notification(Some(notification)) => {
                    let wanted = self
                        .subscribed
                        .as_ref()
                        .is_some_and(|c| c.uuid == notification.uuid);
                    if wanted {
                        return Some(notification.value);
                    }
                }
                LinkStep::Notification(None) => {
                    debug!("Notification stream ended");
                    return None;
                }
                LinkStep::Central(Some(CentralEvent::DeviceDisconnected(id))) if id == self.id => {
                    return None;
                }
                LinkStep::Central(Some(_)) => {}
                LinkStep::Central(None) => self.events = None,
            }
        }
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> TransportResult<()> {
        match self.subscribed.take() {
            Some(c) if c.uuid == characteristic => {
                self.peripheral.unsubscribe(&c).await?;
                Ok(())
            }
            other => {
                self.subscribed = other;
                Err(TransportError::NotSubscribed)
            }
        }
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.notifications = None;
        self.events = None;
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
