//! Console event sink.
//!
//! Turns controller events into terminal lines and operator keystrokes into
//! commands.

use crate::domain::models::{
    HeartRateSample, HrCommand, HrEvent, MessageSeverity, SensorContact, StatusMessage,
};

/// Shown once automatic retries have run out.
pub const RECOVERY_HINT: &str = "press 'r' to reconnect or 's' to rescan";

/// Remembers what the operator has seen so far.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    latest_sample: Option<HeartRateSample>,
    connected_to: Option<String>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the sink with `event` and return the line to print.
    pub fn handle(&mut self, event: &HrEvent) -> String {
        match event {
            HrEvent::Connected(address) => {
                self.connected_to = Some(address.clone());
                format!("Connected to {address}")
            }
            HrEvent::StatusChanged(status) => render_status(status),
            HrEvent::SampleUpdated(sample) => {
                self.latest_sample = Some(*sample);
                render_sample(sample)
            }
            HrEvent::ErrorRaised {
                message,
                attempts_remaining: Some(remaining),
            } => format!("Error: {message} ({remaining} attempts left)"),
            HrEvent::ErrorRaised {
                message,
                attempts_remaining: None,
            } => format!("Error: {message}, {RECOVERY_HINT}"),
            HrEvent::Disconnected => match self.connected_to.take() {
                Some(address) => format!("Disconnected from {address}"),
                None => "Disconnected".to_string(),
            },
        }
    }

    pub fn latest_sample(&self) -> Option<HeartRateSample> {
        self.latest_sample
    }

    pub fn connected_to(&self) -> Option<&str> {
        self.connected_to.as_deref()
    }
}

fn render_sample(sample: &HeartRateSample) -> String {
    match sample.sensor_contact {
        SensorContact::Unknown => format!("Heart rate: {} bpm", sample.value),
        SensorContact::Detected => format!("Heart rate: {} bpm (contact detected)", sample.value),
        SensorContact::NotDetected => {
            format!("Heart rate: {} bpm (no skin contact)", sample.value)
        }
    }
}

fn render_status(status: &StatusMessage) -> String {
    match status.severity {
        MessageSeverity::Info => status.message.clone(),
        MessageSeverity::Success => format!("OK: {}", status.message),
        MessageSeverity::Warning => format!("Warning: {}", status.message),
    }
}

/// Map one line of operator input to a command.
pub fn parse_command(line: &str) -> Option<HrCommand> {
    match line.trim().to_lowercase().as_str() {
        "r" | "reconnect" => Some(HrCommand::ManualReconnect),
        "s" | "scan" | "rescan" => Some(HrCommand::FullScan),
        "q" | "quit" | "stop" => Some(HrCommand::Stop),
        _ => None,
    }
}
