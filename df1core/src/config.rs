use serde_derive::{Deserialize, Serialize};
use serialport::{DataBits, Parity, StopBits};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Controller families recognised by the client.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum PlcType {
    #[serde(rename = "MicroLogix 1000")]
    MicroLogix1000,
    #[serde(rename = "MicroLogix 1100")]
    MicroLogix1100,
    #[serde(rename = "SLC 500")]
    Slc500,
    #[serde(rename = "SLC 5/03")]
    Slc503,
    #[serde(rename = "SLC 5/04")]
    Slc504,
    #[serde(rename = "PLC-5")]
    Plc5,
}

impl fmt::Display for PlcType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            PlcType::MicroLogix1000 => "MicroLogix 1000",
            PlcType::MicroLogix1100 => "MicroLogix 1100",
            PlcType::Slc500 => "SLC 500",
            PlcType::Slc503 => "SLC 5/03",
            PlcType::Slc504 => "SLC 5/04",
            PlcType::Plc5 => "PLC-5",
        };
        f.write_str(name)
    }
}

/// Engine tunables. The sleep and timeout knobs are explicit fields rather
/// than process-wide constants so a deployment can tighten them per link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub plc_type: PlcType,
    /// Our node address.
    pub src: u8,
    /// Controller node address.
    pub dst: u8,
    /// Pause between transmitter loop iterations.
    pub seq_sleep_time: Duration,
    /// How long `expect_message` waits for a reply before synthesising a
    /// timeout.
    pub timeout_read_msg: Duration,
    /// Connect / I-O deadline; also bounds the comm-clear quiet window.
    pub timeout: Duration,
    /// Capacity of the in/out frame history ring.
    pub history_size: usize,
    /// Pause between close and connect during a reconnect.
    pub wait_reconnect: Duration,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            plc_type: PlcType::MicroLogix1000,
            src: 0x00,
            dst: 0x01,
            seq_sleep_time: Duration::from_millis(10),
            timeout_read_msg: Duration::from_millis(500),
            timeout: Duration::from_secs(3),
            history_size: 20,
            wait_reconnect: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    /// Defaults tuned for a TCP serial gateway.
    pub fn for_tcp() -> ClientConfig {
        ClientConfig {
            seq_sleep_time: Duration::from_secs(0),
            timeout_read_msg: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            history_size: 30,
            ..ClientConfig::default()
        }
    }

    /// Defaults tuned for a directly attached serial port.
    pub fn for_serial() -> ClientConfig {
        ClientConfig {
            seq_sleep_time: Duration::from_micros(1),
            timeout_read_msg: Duration::from_secs(1),
            history_size: 20,
            ..ClientConfig::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> ClientConfig {
        serdeconv::from_toml_file(path).expect("Error loading client configuration file")
    }
}

/// Address of the Ethernet-to-serial gateway fronting the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    pub ip_address: String,
    pub ip_port: u16,
}

impl Default for TcpConfig {
    fn default() -> TcpConfig {
        TcpConfig {
            ip_address: "127.0.0.1".to_string(),
            ip_port: 44818,
        }
    }
}

/// Serial line parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    pub parity: Parity,
    pub stopbits: StopBits,
    pub bytesize: DataBits,
}

impl Default for SerialConfig {
    fn default() -> SerialConfig {
        SerialConfig {
            port: "/dev/ttyS0".to_string(),
            baudrate: 19200,
            parity: Parity::None,
            stopbits: StopBits::One,
            bytesize: DataBits::Eight,
        }
    }
}
