//! Bluetooth Service Module
//!
//! The reconnection controller: runs acquisition sessions back to back,
//! decides between the last known device and fresh discovery, applies the
//! bounded automatic retry budget and honours operator overrides.
//!
//! Commands arrive on an unbounded channel and are only applied at defined
//! checkpoints (between sessions, while a session is in flight, during the
//! backoff wait and while idle). The published [`ConnectionState`] is written
//! only from here.

use crate::domain::models::{ConnectionState, HrCommand, HrEvent, StatusMessage};
use crate::domain::retry::{FailureVerdict, PendingOverride, RetryContext, ScanTarget};
use crate::domain::settings::ControllerConfig;
use crate::infrastructure::bluetooth::connection::{
    AcquisitionSession, ActiveLink, SessionFailure, StreamEnd,
};
use crate::infrastructure::bluetooth::scanner::ScanError;
use crate::infrastructure::bluetooth::transport::BleTransport;
use std::future::Future;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Create the command/state channel pair connecting an event sink to a
/// controller.
pub fn controller_channel() -> (ControllerHandle, ControllerPorts) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    (
        ControllerHandle {
            commands: command_tx,
            state: state_rx,
        },
        ControllerPorts {
            commands: command_rx,
            state: state_tx,
        },
    )
}

/// Cloneable command side used by the event sink.
///
/// Commands are fire-and-forget flags; the controller picks them up at its
/// next checkpoint.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<HrCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ControllerHandle {
    pub fn request_manual_reconnect(&self) {
        self.send(HrCommand::ManualReconnect);
    }

    pub fn request_full_scan(&self) {
        self.send(HrCommand::FullScan);
    }

    pub fn stop(&self) {
        self.send(HrCommand::Stop);
    }

    pub fn send(&self, command: HrCommand) {
        let _ = self.commands.send(command);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Controller side of [`controller_channel`].
pub struct ControllerPorts {
    commands: mpsc::UnboundedReceiver<HrCommand>,
    state: watch::Sender<ConnectionState>,
}

struct CommandInbox {
    commands: mpsc::UnboundedReceiver<HrCommand>,
    stop: watch::Sender<bool>,
    open: bool,
}

impl CommandInbox {
    /// `None` means every handle is gone, which counts as a stop.
    fn apply(&mut self, command: Option<HrCommand>, retry: &mut RetryContext) {
        match command {
            Some(HrCommand::ManualReconnect) => {
                info!("Manual reconnect requested");
                retry.request(PendingOverride::ManualReconnect);
            }
            Some(HrCommand::FullScan) => {
                info!("Full rescan requested");
                retry.request(PendingOverride::FullScan);
            }
            Some(HrCommand::Stop) => {
                info!("Stop requested");
                self.stop.send_replace(true);
            }
            None => {
                debug!("Command channel closed");
                self.open = false;
                self.stop.send_replace(true);
            }
        }
    }

    fn drain(&mut self, retry: &mut RetryContext) {
        while self.open {
            match self.commands.try_recv() {
                Ok(command) => self.apply(Some(command), retry),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.apply(None, retry),
            }
        }
    }

    async fn recv(&mut self) -> Option<HrCommand> {
        if self.open {
            self.commands.recv().await
        } else {
            std::future::pending().await
        }
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

/// Poll `future` to completion while applying commands as they arrive.
async fn drive<F: Future>(
    future: F,
    inbox: &mut CommandInbox,
    retry: &mut RetryContext,
) -> F::Output {
    tokio::pin!(future);
    loop {
        tokio::select! {
            output = &mut future => return output,
            command = inbox.recv() => inbox.apply(command, retry),
        }
    }
}

enum CycleOutcome {
    Streamed(StreamEnd),
    Failed {
        trigger: PendingOverride,
        failure: SessionFailure,
    },
    Stopped,
}

pub struct ReconnectionController<T> {
    transport: T,
    event_sender: mpsc::UnboundedSender<HrEvent>,
    config: ControllerConfig,
    retry: RetryContext,
    inbox: CommandInbox,
    stop_signal: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
}

impl<T: BleTransport> ReconnectionController<T> {
    pub fn new(
        transport: T,
        event_sender: mpsc::UnboundedSender<HrEvent>,
        ports: ControllerPorts,
        config: ControllerConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            transport,
            event_sender,
            config,
            retry: RetryContext::new(config.max_attempts),
            inbox: CommandInbox {
                commands: ports.commands,
                stop: stop_tx,
                open: true,
            },
            stop_signal: stop_rx,
            state: ports.state,
        }
    }

    /// Run until stopped. Always ends with a final `Disconnected` event.
    pub async fn run(mut self) {
        info!("Reconnection controller started");

        loop {
            self.inbox.drain(&mut self.retry);
            if self.inbox.stopped() {
                break;
            }

            match self.run_cycle().await {
                CycleOutcome::Streamed(StreamEnd::TransportDisconnected) => {
                    self.transition(ConnectionState::Idle);
                    self.emit(HrEvent::Disconnected);
                    self.send_status(StatusMessage::warning(
                        "Device disconnected, reconnecting...",
                    ));
                }
                CycleOutcome::Streamed(StreamEnd::Cancelled) | CycleOutcome::Stopped => break,
                CycleOutcome::Failed { trigger, failure } => {
                    // A stop that landed mid-attempt ends the run, uncounted.
                    self.inbox.drain(&mut self.retry);
                    if self.inbox.stopped() {
                        info!("Stopped during connection attempt ({})", failure);
                        break;
                    }
                    if !self.handle_failure(trigger, &failure).await {
                        break;
                    }
                }
            }
        }

        self.transition(ConnectionState::Idle);
        self.emit(HrEvent::Disconnected);
        info!("Reconnection controller stopped");
    }

    async fn run_cycle(&mut self) -> CycleOutcome {
        let plan = self.retry.begin_cycle();
        match plan.trigger {
            PendingOverride::FullScan => info!("Full rescan: ignoring last connected device"),
            PendingOverride::ManualReconnect => info!("Manual reconnect cycle"),
            PendingOverride::None => {}
        }

        let mut last_failure = SessionFailure::ScanFailed(ScanError::NotFound);
        for target in &plan.targets {
            self.inbox.drain(&mut self.retry);
            if self.inbox.stopped() {
                return CycleOutcome::Stopped;
            }
            self.transition(ConnectionState::Scanning);

            let state = &self.state;
            let on_phase = |next: ConnectionState| {
                debug!("Connection state -> {}", next);
                state.send_replace(next);
            };
            let session = AcquisitionSession::new(
                &self.transport,
                self.event_sender.clone(),
                self.config.timing,
            );
            let result = drive(
                session.establish(target, &on_phase),
                &mut self.inbox,
                &mut self.retry,
            )
            .await;

            match result {
                Ok(link) => return CycleOutcome::Streamed(self.stream(link).await),
                Err(failure) => {
                    if let ScanTarget::KnownAddress(address) = target {
                        warn!(
                            "Last device {} unavailable ({}), falling back to discovery",
                            address, failure
                        );
                    }
                    last_failure = failure;
                }
            }
        }

        CycleOutcome::Failed {
            trigger: plan.trigger,
            failure: last_failure,
        }
    }

    async fn stream(&mut self, link: ActiveLink<T::Link>) -> StreamEnd {
        self.inbox.drain(&mut self.retry);
        if self.inbox.stopped() {
            self.transition(ConnectionState::Disconnecting);
            link.release().await;
            return StreamEnd::Cancelled;
        }

        let address = link.address().to_string();
        self.retry.record_streaming(&address);
        self.transition(ConnectionState::Streaming);
        info!("Connected to {}", address);
        self.emit(HrEvent::Connected(address));

        let state = &self.state;
        let on_phase = |next: ConnectionState| {
            debug!("Connection state -> {}", next);
            state.send_replace(next);
        };
        let mut stop = self.stop_signal.clone();
        drive(
            link.stream(&mut stop, &on_phase),
            &mut self.inbox,
            &mut self.retry,
        )
        .await
    }

    /// Returns `false` when the controller should shut down.
    async fn handle_failure(&mut self, trigger: PendingOverride, failure: &SessionFailure) -> bool {
        self.transition(ConnectionState::ErrorBackoff);
        error!("Connection attempt failed: {}", failure);

        match self.retry.record_failure(trigger) {
            FailureVerdict::RetryNow(request) => {
                let next = match request {
                    PendingOverride::FullScan => "rescanning for devices...",
                    _ => "reconnecting...",
                };
                self.send_status(StatusMessage::warning(format!("{failure}, {next}")));
                true
            }
            FailureVerdict::Backoff { attempts_remaining } => {
                let delay = self.config.retry_delay;
                self.emit(HrEvent::ErrorRaised {
                    message: format!(
                        "Connection error: {failure}, retrying in {} seconds...",
                        delay.as_secs()
                    ),
                    attempts_remaining: Some(attempts_remaining),
                });
                self.backoff().await;
                true
            }
            FailureVerdict::Exhausted => {
                warn!(
                    "Giving up after {} failed attempts, waiting for a reconnect or rescan request",
                    self.retry.max_attempts + 1
                );
                self.emit(HrEvent::ErrorRaised {
                    message: format!("Connection error: {failure}, maximum retries reached"),
                    attempts_remaining: None,
                });
                self.transition(ConnectionState::Idle);
                self.await_request().await
            }
        }
    }

    /// Wait out the retry delay unless a command cuts it short.
    async fn backoff(&mut self) {
        if self.inbox.stopped() {
            return;
        }
        let sleep = tokio::time::sleep(self.config.retry_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return,
                command = self.inbox.recv() => {
                    self.inbox.apply(command, &mut self.retry);
                    if self.inbox.stopped() || self.retry.pending_override.is_some() {
                        debug!("Backoff cut short by command");
                        return;
                    }
                }
            }
        }
    }

    /// Terminal idle: park until the operator asks for another cycle.
    async fn await_request(&mut self) -> bool {
        loop {
            if self.inbox.stopped() {
                return false;
            }
            if self.retry.pending_override.is_some() {
                return true;
            }
            let command = self.inbox.recv().await;
            self.inbox.apply(command, &mut self.retry);
        }
    }

    fn transition(&self, next: ConnectionState) {
        debug!("Connection state -> {}", next);
        self.state.send_replace(next);
    }

    fn emit(&self, event: HrEvent) {
        let _ = self.event_sender.send(event);
    }

    fn send_status(&self, status: StatusMessage) {
        self.emit(HrEvent::StatusChanged(status));
    }
}
