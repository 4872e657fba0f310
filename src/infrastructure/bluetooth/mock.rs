//! Scripted transport for exercising sessions and the controller in tests.

use crate::infrastructure::bluetooth::transport::{
    BleLink, BleTransport, PeripheralDescriptor, TransportError, TransportResult,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FindByAddress(String),
    Discover,
    AwaitService,
    Connect(String),
    Subscribe,
    Unsubscribe,
    Disconnect,
}

pub fn descriptor(name: Option<&str>, address: &str) -> PeripheralDescriptor<()> {
    PeripheralDescriptor {
        handle: (),
        name: name.map(str::to_string),
        services: Vec::new(),
        address: address.to_string(),
    }
}

struct LinkScript {
    subscribe_ok: bool,
    unsubscribe_ok: bool,
    notifications: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[derive(Default)]
struct Script {
    address_hits: VecDeque<PeripheralDescriptor<()>>,
    discoveries: VecDeque<Vec<PeripheralDescriptor<()>>>,
    service_matches: VecDeque<PeripheralDescriptor<()>>,
    links: VecDeque<Option<LinkScript>>,
    discover_delay: Option<Duration>,
    calls: Vec<Call>,
}

/// Anything not scripted fails: lookups find nothing, connects are refused.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_address_hit(&self, device: PeripheralDescriptor<()>) {
        self.script.lock().unwrap().address_hits.push_back(device);
    }

    pub fn push_discovery(&self, devices: Vec<PeripheralDescriptor<()>>) {
        self.script.lock().unwrap().discoveries.push_back(devices);
    }

    pub fn push_service_match(&self, device: PeripheralDescriptor<()>) {
        self.script.lock().unwrap().service_matches.push_back(device);
    }

    /// Make every discovery pass take `delay` before returning.
    pub fn delay_discovery(&self, delay: Duration) {
        self.script.lock().unwrap().discover_delay = Some(delay);
    }

    pub fn push_connect_failure(&self) {
        self.script.lock().unwrap().links.push_back(None);
    }

    /// Script the next connect. Notifications sent on the returned feed are
    /// delivered in order; dropping it disconnects the link.
    pub fn push_link(&self, subscribe_ok: bool) -> mpsc::UnboundedSender<Vec<u8>> {
        self.push_link_with(subscribe_ok, true)
    }

    pub fn push_link_with(
        &self,
        subscribe_ok: bool,
        unsubscribe_ok: bool,
    ) -> mpsc::UnboundedSender<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script.lock().unwrap().links.push_back(Some(LinkScript {
            subscribe_ok,
            unsubscribe_ok,
            notifications: rx,
        }));
        tx
    }

    /// A link that delivers `payloads` and then disconnects.
    pub fn push_streaming_link(&self, payloads: Vec<Vec<u8>>) {
        let feed = self.push_link(true);
        for payload in payloads {
            let _ = feed.send(payload);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.script.lock().unwrap().calls.push(call);
    }
}

impl BleTransport for ScriptedTransport {
    type Handle = ();
    type Link = ScriptedLink;

    async fn find_by_address(
        &self,
        address: &str,
        _timeout: Duration,
    ) -> TransportResult<Option<PeripheralDescriptor<()>>> {
        self.record(Call::FindByAddress(address.to_string()));
        let mut script = self.script.lock().unwrap();
        let index = script.address_hits.iter().position(|d| d.address == address);
        Ok(index.and_then(|index| script.address_hits.remove(index)))
    }

    async fn discover(&self, _window: Duration) -> TransportResult<Vec<PeripheralDescriptor<()>>> {
        self.record(Call::Discover);
        let delay = self.script.lock().unwrap().discover_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .script
            .lock()
            .unwrap()
            .discoveries
            .pop_front()
            .unwrap_or_default())
    }

    async fn await_service(
        &self,
        _service: Uuid,
        _timeout: Duration,
    ) -> TransportResult<Option<PeripheralDescriptor<()>>> {
        self.record(Call::AwaitService);
        Ok(self.script.lock().unwrap().service_matches.pop_front())
    }

    async fn connect(&self, peripheral: &PeripheralDescriptor<()>) -> TransportResult<ScriptedLink> {
        self.record(Call::Connect(peripheral.address.clone()));
        let next = self.script.lock().unwrap().links.pop_front().flatten();
        match next {
            Some(link) => Ok(ScriptedLink {
                link,
                transport: self.clone(),
            }),
            None => Err(TransportError::Other("connection refused".to_string())),
        }
    }
}

pub struct ScriptedLink {
    link: LinkScript,
    transport: ScriptedTransport,
}

impl BleLink for ScriptedLink {
    async fn subscribe(&mut self, characteristic: Uuid) -> TransportResult<()> {
        self.transport.record(Call::Subscribe);
        if self.link.subscribe_ok {
            Ok(())
        } else {
            Err(TransportError::CharacteristicNotFound(characteristic))
        }
    }

    async fn next_notification(&mut self) -> Option<Vec<u8>> {
        self.link.notifications.recv().await
    }

    async fn unsubscribe(&mut self, _characteristic: Uuid) -> TransportResult<()> {
        self.transport.record(Call::Unsubscribe);
        if self.link.unsubscribe_ok {
            Ok(())
        } else {
            Err(TransportError::NotSubscribed)
        }
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        self.transport.record(Call::Disconnect);
        Ok(())
    }
}
