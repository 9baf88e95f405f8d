//! Bench bridge client.
//!
//! Talks to the USB LoRa bridge and, through it, to the lighting node.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use anyhow::Result;
use serialport::SerialPort;

use crate::protocol::{decode_reply, encode_request, AirPacket, BridgeCommand, BridgeFrame, BridgeReply};

/// Scan ttyACM devices for one that answers GetVersion.
pub fn find_bridge_port() -> Result<String> {
    for port_info in serialport::available_ports()? {
        if !port_info.port_name.contains("ttyACM") {
            continue;
        }

        if let Ok(mut client) = BridgeClient::new(&port_info.port_name, 115200) {
            client.set_timeout(Duration::from_millis(500));
            if client.version().is_ok() {
                return Ok(port_info.port_name);
            }
        }
    }

    anyhow::bail!("No LoRa bridge found - ensure it is connected")
}

/// Port argument, or auto-detect for "auto".
pub fn resolve_port(port_arg: &str) -> Result<String> {
    if port_arg == "auto" {
        find_bridge_port()
    } else {
        Ok(port_arg.to_string())
    }
}

/// Client for the LoRa bridge.
pub struct BridgeClient {
    port: Box<dyn SerialPort>,
    timeout: Duration,
    /// Packets heard while waiting for a command reply
    heard: VecDeque<AirPacket>,
}

impl BridgeClient {
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(3),
            heard: VecDeque::new(),
        })
    }

    /// Set the reply timeout for bridge commands.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Drop anything pending on the port and in the heard queue.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        self.heard.clear();
        Ok(())
    }

    /// Bridge firmware version.
    pub fn version(&mut self) -> Result<(u8, u8, u8)> {
        let frame = self.request(BridgeCommand::GetVersion, &[])?;
        match (frame.reply, frame.payload.as_slice()) {
            (BridgeReply::Version, [major, minor, patch]) => Ok((*major, *minor, *patch)),
            (reply, payload) => anyhow::bail!("Expected Version, got {:?} {:02x?}", reply, payload),
        }
    }

    /// Put a line of text on air for the node.
    pub fn send_to_node(&mut self, text: &str) -> Result<()> {
        let frame = self.request(BridgeCommand::LoraTx, text.as_bytes())?;
        match frame.reply {
            BridgeReply::TxComplete => Ok(()),
            reply => anyhow::bail!("Bridge TX failed: {:?} {:02x?}", reply, frame.payload),
        }
    }

    /// Everything the node says within `window`.
    pub fn listen(&mut self, window: Duration) -> Result<Vec<AirPacket>> {
        let deadline = Instant::now() + window;
        let mut packets: Vec<AirPacket> = self.heard.drain(..).collect();

        while Instant::now() < deadline {
            if let Some(frame) = self.read_frame(deadline)? {
                if frame.reply == BridgeReply::RxPacket {
                    packets.push(frame.air_packet()?);
                }
            }
        }

        Ok(packets)
    }

    /// First packet starting with `prefix`, within `timeout`.
    pub fn wait_for(&mut self, prefix: &str, timeout: Duration) -> Result<AirPacket> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(index) = self.heard.iter().position(|p| p.text.starts_with(prefix)) {
                if let Some(packet) = self.heard.remove(index) {
                    return Ok(packet);
                }
            }

            if Instant::now() >= deadline {
                anyhow::bail!("Timeout waiting for {}", prefix);
            }

            if let Some(frame) = self.read_frame(deadline)? {
                if frame.reply == BridgeReply::RxPacket {
                    self.heard.push_back(frame.air_packet()?);
                }
            }
        }
    }

    /// Send a bridge command and wait for its reply, queueing any air traffic.
    fn request(&mut self, command: BridgeCommand, payload: &[u8]) -> Result<BridgeFrame> {
        self.port.write_all(&encode_request(command, payload))?;
        self.port.flush()?;

        let deadline = Instant::now() + self.timeout;
        while Instant::now() < deadline {
            match self.read_frame(deadline)? {
                Some(frame) if frame.reply == BridgeReply::RxPacket => {
                    self.heard.push_back(frame.air_packet()?);
                }
                Some(frame) => return Ok(frame),
                None => {}
            }
        }

        anyhow::bail!("Timeout waiting for bridge reply to {:?}", command)
    }

    /// Read one delimited frame, or `None` if the deadline passes first.
    fn read_frame(&mut self, deadline: Instant) -> Result<Option<BridgeFrame>> {
        let mut data = Vec::new();
        let mut buf = [0u8; 1];

        while Instant::now() < deadline {
            match self.port.read(&mut buf) {
                Ok(1) if buf[0] == 0x00 => {
                    if !data.is_empty() {
                        return decode_reply(&data).map(Some);
                    }
                }
                Ok(1) => data.push(buf[0]),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }
}
