//! Serial transport for boards exposed through a UART bridge.
//!
//! Legacy boards flashed with a UART bridge present as a plain serial port
//! (CH340/CH341 on most hardware). The bridge pushes the 6-byte status reply
//! on its own after each frame, so [`SerialConnection::read_status`] only
//! reads; it never writes a request first.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, trace, warn};

use beamkit_core::ConnectionError;

use super::{Connection, SerialParams, SerialParity};

/// Description of one enumerated serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// OS port path.
    pub port_name: String,
    /// Human-readable description, when the OS provides one.
    pub description: Option<String>,
    /// USB vendor id, when the port is USB-backed.
    pub vid: Option<u16>,
    /// USB product id, when the port is USB-backed.
    pub pid: Option<u16>,
}

/// Enumerate serial ports that plausibly belong to a controller board.
///
/// Filters the OS list down to USB-serial style names; motherboard UARTs and
/// bluetooth ports are skipped.
pub fn list_ports() -> Result<Vec<SerialPortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(|e| ConnectionError::OpenFailed {
        index: -1,
        reason: format!("port enumeration failed: {e}"),
    })?;

    let mut found = Vec::new();
    for port in ports {
        if !is_candidate_port(&port.port_name) {
            continue;
        }
        let (description, vid, pid) = match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                (usb.product.clone(), Some(usb.vid), Some(usb.pid))
            }
            _ => (None, None, None),
        };
        found.push(SerialPortInfo {
            port_name: port.port_name,
            description,
            vid,
            pid,
        });
    }
    trace!(count = found.len(), "enumerated candidate serial ports");
    Ok(found)
}

fn is_candidate_port(name: &str) -> bool {
    name.starts_with("COM")
        || name.starts_with("/dev/ttyUSB")
        || name.starts_with("/dev/ttyACM")
        || name.starts_with("/dev/cu.usbserial")
        || name.starts_with("/dev/cu.usbmodem")
}

/// Serial transport implementing [`Connection`] for the legacy board family.
pub struct SerialConnection {
    params: SerialParams,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialConnection {
    /// Create an unopened serial connection with the given parameters.
    pub fn new(params: SerialParams) -> Self {
        Self { params, port: None }
    }

    /// Link parameters this connection was built with.
    pub fn params(&self) -> &SerialParams {
        &self.params
    }

    fn resolve_port_name(&self, index: i32) -> Result<String, ConnectionError> {
        if !self.params.port.is_empty() {
            return Ok(self.params.port.clone());
        }
        let ports = list_ports()?;
        if index < 0 {
            return Err(ConnectionError::DeviceNotFound { index });
        }
        ports
            .get(index as usize)
            .map(|info| info.port_name.clone())
            .ok_or(ConnectionError::DeviceNotFound { index })
    }

    fn map_open_error(err: serialport::Error, index: i32) -> ConnectionError {
        match err.kind() {
            serialport::ErrorKind::NoDevice => ConnectionError::DeviceNotFound { index },
            serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                ConnectionError::AccessDenied {
                    reason: err.to_string(),
                }
            }
            _ => ConnectionError::OpenFailed {
                index,
                reason: err.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialConnection")
            .field("params", &self.params)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Connection for SerialConnection {
    fn open(&mut self, index: i32) -> Result<(), ConnectionError> {
        if self.port.is_some() {
            return Ok(());
        }
        let name = self.resolve_port_name(index)?;

        let data_bits = match self.params.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = if self.params.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        };
        let parity = match self.params.parity {
            SerialParity::None => Parity::None,
            SerialParity::Even => Parity::Even,
            SerialParity::Odd => Parity::Odd,
        };
        let flow_control = if self.params.flow_control {
            FlowControl::Hardware
        } else {
            FlowControl::None
        };

        let port = serialport::new(&name, self.params.baud_rate)
            .timeout(Duration::from_millis(self.params.timeout_ms))
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .open()
            .map_err(|e| Self::map_open_error(e, index))?;

        debug!(port = %name, baud = self.params.baud_rate, "serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), ConnectionError> {
        let port = self.port.as_mut().ok_or(ConnectionError::NotOpen)?;
        port.write_all(frame)
            .and_then(|_| port.flush())
            .map_err(|e| {
                warn!(error = %e, "serial write failed");
                ConnectionError::WriteFailed {
                    reason: e.to_string(),
                }
            })
    }

    fn read_status(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let want = self.params.status_reply_len;
        let port = self.port.as_mut().ok_or(ConnectionError::NotOpen)?;
        let mut reply = vec![0u8; want];
        let mut got = 0;
        while got < want {
            match port.read(&mut reply[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ConnectionError::WriteFailed {
                        reason: format!("serial read failed: {e}"),
                    });
                }
            }
        }
        if got == 0 {
            return Err(ConnectionError::ReadTimeout);
        }
        if got < want {
            return Err(ConnectionError::ShortStatusReply {
                expected: want,
                got,
            });
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_port_filter() {
        assert!(is_candidate_port("COM3"));
        assert!(is_candidate_port("/dev/ttyUSB0"));
        assert!(is_candidate_port("/dev/ttyACM1"));
        assert!(is_candidate_port("/dev/cu.usbserial-1410"));
        assert!(is_candidate_port("/dev/cu.usbmodem14201"));

        assert!(!is_candidate_port("/dev/ttyS0"));
        assert!(!is_candidate_port("/dev/cu.Bluetooth-Incoming-Port"));
        assert!(!is_candidate_port("/dev/random"));
    }

    #[test]
    fn unopened_connection_rejects_io() {
        let mut conn = SerialConnection::new(SerialParams::default());
        assert!(!conn.is_connected());
        assert!(matches!(
            conn.write(&[0u8; 32]),
            Err(ConnectionError::NotOpen)
        ));
        assert!(matches!(conn.read_status(), Err(ConnectionError::NotOpen)));
        // Closing an unopened connection is a no-op.
        conn.close();
    }

    #[test]
    fn named_port_skips_enumeration() {
        let conn = SerialConnection::new(SerialParams {
            port: "/dev/ttyUSB7".into(),
            ..Default::default()
        });
        assert_eq!(
            conn.resolve_port_name(0).expect("named port"),
            "/dev/ttyUSB7"
        );
    }

    #[test]
    fn negative_index_is_not_found() {
        let conn = SerialConnection::new(SerialParams::default());
        assert!(matches!(
            conn.resolve_port_name(-1),
            Err(ConnectionError::DeviceNotFound { index: -1 })
        ));
    }
}
