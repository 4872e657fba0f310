//! BLE Connection Module
//!
//! One acquisition session: locate a peripheral, connect, subscribe to heart
//! rate notifications and pump them until the link drops or a stop is
//! requested. A session is built fresh for every attempt and owns the live
//! link exclusively.

use crate::domain::models::{ConnectionState, HrEvent, StatusMessage};
use crate::domain::retry::ScanTarget;
use crate::domain::settings::SessionTiming;
use crate::infrastructure::bluetooth::protocol::{self, HEART_RATE_MEASUREMENT_UUID};
use crate::infrastructure::bluetooth::scanner::{BleScanner, ScanError};
use crate::infrastructure::bluetooth::transport::{BleLink, BleTransport, TransportError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Why a session ended before notifications started flowing.
#[derive(Debug, Error)]
pub enum SessionFailure {
    #[error("scan failed: {0}")]
    ScanFailed(#[from] ScanError),
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] TransportError),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(#[source] TransportError),
}

/// Why a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    TransportDisconnected,
    Cancelled,
}

pub struct AcquisitionSession<'a, T> {
    transport: &'a T,
    event_sender: mpsc::UnboundedSender<HrEvent>,
    timing: SessionTiming,
}

impl<'a, T: BleTransport> AcquisitionSession<'a, T> {
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

    /// Run the session up to a subscribed link.
    ///
    /// `on_phase` is told when the session moves on to connecting and
    /// subscribing.
    pub async fn establish(
        self,
        target: &ScanTarget,
        on_phase: &dyn Fn(ConnectionState),
    ) -> Result<ActiveLink<T::Link>, SessionFailure> {
        let scanner = BleScanner::new(self.transport, self.event_sender.clone(), self.timing);
        let device = scanner
            .locate(target)
            .await
            .map_err(SessionFailure::ScanFailed)?;

        on_phase(ConnectionState::Connecting);
        info!("Connecting to {} [{}]", device.display_name(), device.address);
        self.send_status(format!("Connecting to {}...", device.address));

        let mut link = self.transport.connect(&device).await.map_err(|e| {
            error!("Failed to connect to {}: {}", device.address, e);
            SessionFailure::ConnectFailed(e)
        })?;

        on_phase(ConnectionState::Subscribing);
        if let Err(e) = link.subscribe(HEART_RATE_MEASUREMENT_UUID).await {
            error!("Failed to subscribe to heart rate notifications: {}", e);
            if let Err(disconnect_err) = link.disconnect().await {
                warn!(
                    "Disconnect after failed subscribe also failed: {}",
                    disconnect_err
                );
            }
            return Err(SessionFailure::SubscribeFailed(e));
        }

        info!("Subscribed to heart rate measurements on {}", device.address);
        Ok(ActiveLink {
            link,
            address: device.address,
            event_sender: self.event_sender,
        })
    }

    fn send_status(&self, message: impl Into<String>) {
        let _ = self
            .event_sender
            .send(HrEvent::StatusChanged(StatusMessage::info(message)));
    }
}

/// A connected, subscribed peripheral.
pub struct ActiveLink<L> {
    link: L,
    address: String,
    event_sender: mpsc::UnboundedSender<HrEvent>,
}

impl<L: BleLink> ActiveLink<L> {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Forward notifications until the peripheral disconnects or `stop`
    /// turns true, then tear the link down.
    pub async fn stream(
        mut self,
        stop: &mut watch::Receiver<bool>,
        on_phase: &dyn Fn(ConnectionState),
    ) -> StreamEnd {
        self.send_status(StatusMessage::success("Listening for heart rate data..."));

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = stop_requested(stop) => break StreamEnd::Cancelled,
                payload = self.link.next_notification() => payload,
            };
            match next {
                Some(bytes) => self.deliver(&bytes),
                None => break StreamEnd::TransportDisconnected,
            }
        };

        match end {
            StreamEnd::TransportDisconnected => warn!("Device {} disconnected", self.address),
            StreamEnd::Cancelled => info!("Streaming from {} stopped", self.address),
        }
        on_phase(ConnectionState::Disconnecting);
        self.teardown().await;
        end
    }

    /// Tear the link down without streaming.
    pub async fn release(mut self) {
        self.teardown().await;
    }

    fn deliver(&self, bytes: &[u8]) {
        match protocol::decode(bytes) {
            Ok(sample) => {
                debug!(
                    "Heart rate: {} bpm, contact: {:?}",
                    sample.value, sample.sensor_contact
                );
                let _ = self.event_sender.send(HrEvent::SampleUpdated(sample));
            }
            Err(e) => {
                warn!("Ignoring heart rate packet {:02X?}: {}", bytes, e);
                self.send_status(StatusMessage::warning(format!(
                    "Ignored malformed heart rate packet: {e}"
                )));
            }
        }
    }

    /// Failures here are logged only; the link is going away regardless.
    async fn teardown(&mut self) {
        match self.link.unsubscribe(HEART_RATE_MEASUREMENT_UUID).await {
            Ok(()) => info!("Stopped heart rate notifications"),
            Err(e) => warn!("Failed to stop heart rate notifications: {}", e),
        }
        if let Err(e) = self.link.disconnect().await {
            warn!("Failed to disconnect from {}: {}", self.address, e);
        }
    }

    fn send_status(&self, status: StatusMessage) {
        let _ = self.event_sender.send(HrEvent::StatusChanged(status));
    }
}

/// Resolves once `stop` reads true or its sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{HeartRateSample, SensorContact};
    use crate::infrastructure::bluetooth::mock::{descriptor, Call, ScriptedTransport};

    fn drain(rx: &mut mpsc::UnboundedReceiver<HrEvent>) -> Vec<HrEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn samples(events: &[HrEvent]) -> Vec<HeartRateSample> {
        events
            .iter()
            .filter_map(|e| match e {
                HrEvent::SampleUpdated(sample) => Some(*sample),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_streams_samples_in_order_and_skips_bad_packets() {
        let transport = ScriptedTransport::new();
        transport.push_discovery(vec![descriptor(Some("MiBand 7"), "AA:BB")]);
        transport.push_streaming_link(vec![vec![0x00, 60], vec![0x01], vec![0x06, 61]]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_stop_tx, mut stop_rx) = watch::channel(false);

        let session = AcquisitionSession::new(&transport, tx, SessionTiming::default());
        let link = session
            .establish(&ScanTarget::DiscoverFresh, &|_| {})
            .await
            .unwrap();
        assert_eq!(link.address(), "AA:BB");

        let end = link.stream(&mut stop_rx, &|_| {}).await;
        assert_eq!(end, StreamEnd::TransportDisconnected);

        let events = drain(&mut rx);
        assert_eq!(
            samples(&events),
            vec![
                HeartRateSample {
                    value: 60,
                    sensor_contact: SensorContact::Unknown
                },
                HeartRateSample {
                    value: 61,
                    sensor_contact: SensorContact::Detected
                },
            ]
        );
        assert!(events.iter().any(|e| matches!(
            e,
            HrEvent::StatusChanged(StatusMessage { message, .. }) if message.contains("malformed")
        )));

        let calls = transport.calls();
        assert!(calls.ends_with(&[Call::Unsubscribe, Call::Disconnect]));
    }

    #[tokio::test]
    async fn test_stop_tears_down_link() {
        let transport = ScriptedTransport::new();
        transport.push_discovery(vec![descriptor(Some("MiBand 7"), "AA:BB")]);
        let _feed = transport.push_link(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let link = AcquisitionSession::new(&transport, tx, SessionTiming::default())
            .establish(&ScanTarget::DiscoverFresh, &|_| {})
            .await
            .unwrap();
        stop_tx.send_replace(true);

        assert_eq!(link.stream(&mut stop_rx, &|_| {}).await, StreamEnd::Cancelled);
        assert!(transport.calls().ends_with(&[Call::Unsubscribe, Call::Disconnect]));
    }

    #[tokio::test]
    async fn test_unsubscribe_failure_is_not_escalated() {
        let transport = ScriptedTransport::new();
        transport.push_discovery(vec![descriptor(Some("MiBand 7"), "AA:BB")]);
        drop(transport.push_link_with(true, false));
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop_tx, mut stop_rx) = watch::channel(false);

        let link = AcquisitionSession::new(&transport, tx, SessionTiming::default())
            .establish(&ScanTarget::DiscoverFresh, &|_| {})
            .await
            .unwrap();

        assert_eq!(
            link.stream(&mut stop_rx, &|_| {}).await,
            StreamEnd::TransportDisconnected
        );
        assert!(transport.calls().ends_with(&[Call::Unsubscribe, Call::Disconnect]));
    }

    #[tokio::test]
    async fn test_failure_kinds() {
        let (tx, _rx) = mpsc::unbounded_channel();

        let transport = ScriptedTransport::new();
        let result = AcquisitionSession::new(&transport, tx.clone(), SessionTiming::default())
            .establish(&ScanTarget::KnownAddress("AA:BB".into()), &|_| {})
            .await;
        assert!(matches!(
            result,
            Err(SessionFailure::ScanFailed(ScanError::AddressNotFound(_)))
        ));

        let transport = ScriptedTransport::new();
        transport.push_discovery(vec![descriptor(Some("MiBand 7"), "AA:BB")]);
        transport.push_connect_failure();
        let result = AcquisitionSession::new(&transport, tx.clone(), SessionTiming::default())
            .establish(&ScanTarget::DiscoverFresh, &|_| {})
            .await;
        assert!(matches!(result, Err(SessionFailure::ConnectFailed(_))));

        let transport = ScriptedTransport::new();
        transport.push_discovery(vec![descriptor(Some("MiBand 7"), "AA:BB")]);
        let _feed = transport.push_link(false);
        let result = AcquisitionSession::new(&transport, tx, SessionTiming::default())
            .establish(&ScanTarget::DiscoverFresh, &|_| {})
            .await;
        assert!(matches!(
            result,
            Err(SessionFailure::SubscribeFailed(
                TransportError::CharacteristicNotFound(_)
            ))
        ));
        assert_eq!(transport.calls().last(), Some(&Call::Disconnect));
    }

    #[tokio::test]
    async fn test_phases_reported_in_order() {
        let transport = ScriptedTransport::new();
        transport.push_discovery(vec![descriptor(Some("MiBand 7"), "AA:BB")]);
        transport.push_streaming_link(Vec::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_stop_tx, mut stop_rx) = watch::channel(false);
        let phases = std::cell::RefCell::new(Vec::new());
        let record = |state: ConnectionState| phases.borrow_mut().push(state);

        let link = AcquisitionSession::new(&transport, tx, SessionTiming::default())
            .establish(&ScanTarget::DiscoverFresh, &record)
            .await
            .unwrap();
        link.stream(&mut stop_rx, &record).await;

        assert_eq!(
            phases.into_inner(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Subscribing,
                ConnectionState::Disconnecting
            ]
        );
    }
}
