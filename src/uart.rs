use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::TransportError;
use crate::transport::{Connector, LinkEvent, Transport};

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to enumerate serial ports");
            vec![]
        })
}

/// Reaches the sensor through a serial port, e.g. a BLE-UART bridge or RFCOMM device.
pub struct SerialConnector {
    config: SerialConfig,
    port_path: Option<String>,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port_path: None,
        }
    }
}

impl Connector for SerialConnector {
    fn discover(&mut self) -> Result<String, TransportError> {
        let path = match &self.config.port {
            Some(port) => port.clone(),
            None => available_ports()
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::NotFound("no serial ports available".into()))?,
        };
        debug!(port = %path, "selected serial port");
        self.port_path = Some(path.clone());
        Ok(path)
    }

    fn open(&mut self, events: Sender<LinkEvent>) -> Result<Arc<dyn Transport>, TransportError> {
        let path = match &self.port_path {
            Some(path) => path.clone(),
            None => self.discover()?,
        };

        let port = serialport::new(&path, self.config.baud_rate)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .open()
            .map_err(|source| TransportError::Open {
                port: path.clone(),
                source,
            })?;
        let reader = port.try_clone().map_err(|source| TransportError::Open {
            port: path.clone(),
            source,
        })?;

        let closed = Arc::new(AtomicBool::new(false));
        let reader_closed = Arc::clone(&closed);
        thread::spawn(move || read_loop(reader, events, reader_closed));

        info!(port = %path, baud = self.config.baud_rate, "serial link open");
        let transport: Arc<dyn Transport> = Arc::new(SerialTransport {
            writer: Mutex::new(port),
            closed,
        });
        Ok(transport)
    }
}

pub struct SerialTransport {
    writer: Mutex<Box<dyn SerialPort>>,
    closed: Arc<AtomicBool>,
}

impl Transport for SerialTransport {
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let mut port = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, events: Sender<LinkEvent>, closed: Arc<AtomicBool>) {
    let mut serial_buf = vec![0u8; 256];

    while !closed.load(Ordering::SeqCst) {
        match port.read(&mut serial_buf) {
            Ok(0) => {}
            Ok(n) => {
                if events.send(LinkEvent::Data(serial_buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => {
                warn!(error = %e, "serial read failed, dropping link");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    let _ = events.send(LinkEvent::Disconnected);
    debug!("serial reader exited");
}
