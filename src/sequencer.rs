use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Timing;
use crate::device_config::{CommMode, DeviceConfig};
use crate::error::TransportError;
use crate::protocol::{self, Command};
use crate::state::{DeviceState, lock};
use crate::transport::Transport;

/// Write access to the sensor that records everything it sends.
#[derive(Clone)]
pub struct Link {
    transport: Arc<dyn Transport>,
    state: Arc<Mutex<DeviceState>>,
}

impl Link {
    pub fn new(transport: Arc<dyn Transport>, state: Arc<Mutex<DeviceState>>) -> Self {
        Self { transport, state }
    }

    /// Log and send one command. A failed write is logged, never raised.
    pub fn send(&self, command: &Command) -> bool {
        let text = command.to_ascii();
        lock(&self.state).log.push_sent(text.as_str());

        match self.transport.write(&protocol::frame(&text)) {
            Ok(()) => {
                debug!(command = %text, "sent");
                true
            }
            Err(e) => {
                warn!(command = %text, error = %e, "send failed");
                lock(&self.state).log.push_sent(format!("Err: {e}"));
                false
            }
        }
    }

    /// Send whitespace-separated hex text as raw bytes.
    pub fn send_hex(&self, text: &str) -> Result<(), TransportError> {
        let compact: String = text.split_whitespace().collect();
        let bytes = hex::decode(&compact)?;
        lock(&self.state).log.push_sent(compact.to_uppercase());
        self.transport.write(&bytes).inspect_err(|e| {
            lock(&self.state).log.push_sent(format!("Err: {e}"));
        })
    }

    /// Write bytes without framing or logging.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.transport.write(bytes)
    }

    pub fn note(&self, text: &str) {
        lock(&self.state).log.push_sent(text);
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Send(Command),
    Wait(Duration),
    /// Log line only, nothing goes on the wire.
    Note(String),
}

/// Steps of a multi-command exchange, run on its own thread. Waits are
/// minimums; sequences running at the same time may interleave writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    name: &'static str,
    steps: Vec<Step>,
}

impl Sequence {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn send(mut self, command: Command) -> Self {
        self.steps.push(Step::Send(command));
        self
    }

    pub fn wait(mut self, delay: Duration) -> Self {
        self.steps.push(Step::Wait(delay));
        self
    }

    pub fn note(mut self, text: impl Into<String>) -> Self {
        self.steps.push(Step::Note(text.into()));
        self
    }

    /// Sent right after the link comes up.
    pub fn on_connect(timing: &Timing) -> Self {
        Self::new("connect")
            .send(Command::RadarInit)
            .wait(timing.init_gap())
            .send(Command::Query)
            .wait(timing.query_gap())
            .send(Command::RadarStatus)
    }

    pub fn poll(timing: &Timing) -> Self {
        Self::new("poll")
            .send(Command::Query)
            .wait(timing.query_gap())
            .send(Command::RadarStatus)
    }

    pub fn nb_config_query(timing: &Timing) -> Self {
        Self::new("nb-query")
            .send(Command::QueryApn)
            .wait(timing.query_gap())
            .send(Command::QueryMqtt)
    }

    pub fn apply_thresholds(config: &DeviceConfig, timing: &Timing) -> Self {
        Self::new("thresholds")
            .send(Command::TargetThreshold(config.target_threshold))
            .wait(timing.threshold_gap())
            .send(Command::CoverThreshold(config.cover_threshold))
            .note("Thresholds update requested.")
    }

    /// Push the active uplink's settings to the device.
    pub fn save_config(config: &DeviceConfig, timing: &Timing) -> Self {
        match config.comm_mode {
            CommMode::NbIot => Self::new("save-nb")
                .send(Command::SetApn(config.apn.clone()))
                .wait(timing.config_gap())
                .send(Command::set_mqtt_from(config))
                .note("NB-IoT configuration synced."),
            CommMode::LoRaWan => Self::new("save-lorawan")
                .send(Command::DevEui(config.dev_eui.clone()))
                .wait(timing.config_gap())
                .send(Command::AppKey(config.app_key.clone()))
                .wait(timing.config_gap())
                .send(Command::Region(config.region.clone()))
                .note("LoRaWAN configuration synced."),
        }
    }

    /// Run to completion on the calling thread.
    pub fn run(&self, link: &Link) {
        self.drive(link, |delay| {
            thread::sleep(delay);
            true
        });
    }

    /// Run until finished or until `stop` fires. Returns false if stopped.
    pub fn run_until(&self, link: &Link, stop: &Receiver<()>) -> bool {
        self.drive(link, |delay| {
            matches!(stop.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
        })
    }

    pub fn spawn(self, link: Link) -> JoinHandle<()> {
        thread::spawn(move || self.run(&link))
    }

    fn drive(&self, link: &Link, mut wait: impl FnMut(Duration) -> bool) -> bool {
        debug!(sequence = self.name, "starting");
        for step in &self.steps {
            match step {
                Step::Send(command) => {
                    link.send(command);
                }
                Step::Wait(delay) => {
                    if !wait(*delay) {
                        debug!(sequence = self.name, "cancelled");
                        return false;
                    }
                }
                Step::Note(text) => link.note(text),
            }
        }
        true
    }
}

/// Status poll repeating while connected. Dropping it stops the timer.
pub struct Poller {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    pub fn start(link: Link, timing: Timing) -> Self {
        let (stop, stop_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let sequence = Sequence::poll(&timing);
            loop {
                match stop_rx.recv_timeout(timing.poll_interval()) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !sequence.run_until(&link, &stop_rx) {
                            break;
                        }
                    }
                    _ => break,
                }
            }
            debug!("poller stopped");
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the timer and wait for an in-flight poll to wind down.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
