//! Bridge framing and lighting node text protocol.
//!
//! The bench reaches the lighting node through a USB LoRa bridge speaking a
//! binary serial protocol:
//!
//! ```text
//! [COBS([version][id][length: u16 LE][payload][crc16-xmodem: u16 LE])][0x00]
//! ```
//!
//! `LoraTx` carries the raw bytes to put on air; everything the bridge hears
//! comes back as an unsolicited `RxPacket` with `[data][rssi: i16 LE][snr: i8]`.

#![allow(dead_code)]

use crc::{Crc, CRC_16_XMODEM};

/// Bridge protocol version
pub const BRIDGE_PROTOCOL_VERSION: u8 = 1;

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Requests understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgeCommand {
    GetVersion = 0x01,
    LoraTx = 0x10,
}

/// Frames sent by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgeReply {
    Version = 0x01,
    TxComplete = 0x10,
    RxPacket = 0x11,
    Error = 0xFF,
}

impl TryFrom<u8> for BridgeReply {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        [
            BridgeReply::Version,
            BridgeReply::TxComplete,
            BridgeReply::RxPacket,
            BridgeReply::Error,
        ]
        .into_iter()
        .find(|reply| *reply as u8 == value)
        .ok_or(value)
    }
}

/// One decoded bridge frame.
#[derive(Debug, Clone)]
pub struct BridgeFrame {
    pub reply: BridgeReply,
    pub payload: Vec<u8>,
}

/// Packet heard over the air by the bridge.
#[derive(Debug, Clone)]
pub struct AirPacket {
    pub text: String,
    pub rssi: i16,
    pub snr: i8,
}

impl BridgeFrame {
    /// Split an `RxPacket` payload into node text and link quality.
    pub fn air_packet(&self) -> anyhow::Result<AirPacket> {
        if self.reply != BridgeReply::RxPacket {
            anyhow::bail!("Not an RxPacket: {:?}", self.reply);
        }
        if self.payload.len() < 3 {
            anyhow::bail!("RxPacket too short: {} bytes", self.payload.len());
        }

        let data_len = self.payload.len() - 3;
        let (data, trailer) = self.payload.split_at(data_len);
        Ok(AirPacket {
            text: String::from_utf8_lossy(data).trim().to_string(),
            rssi: i16::from_le_bytes([trailer[0], trailer[1]]),
            snr: trailer[2] as i8,
        })
    }
}

/// Encode a request, including COBS and the trailing delimiter.
pub fn encode_request(command: BridgeCommand, payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(6 + payload.len());
    raw.push(BRIDGE_PROTOCOL_VERSION);
    raw.push(command as u8);
    raw.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    raw.extend_from_slice(payload);
    raw.extend_from_slice(&CRC.checksum(&raw).to_le_bytes());

    let mut encoded = vec![0u8; corncobs::max_encoded_len(raw.len())];
    let len = corncobs::encode_buf(&raw, &mut encoded);
    encoded.truncate(len);
    encoded
}

/// Decode one frame as read off the port (delimiter stripped).
pub fn decode_reply(frame: &[u8]) -> anyhow::Result<BridgeFrame> {
    // corncobs wants the delimiter back
    let mut encoded = frame.to_vec();
    encoded.push(0x00);

    let mut raw = vec![0u8; encoded.len()];
    let len = corncobs::decode_buf(&encoded, &mut raw)
        .map_err(|e| anyhow::anyhow!("COBS decode error: {:?}", e))?;
    raw.truncate(len);

    if raw.len() < 6 {
        anyhow::bail!("Frame too short: {} bytes", raw.len());
    }
    let length = u16::from_le_bytes([raw[2], raw[3]]) as usize;
    if raw.len() != 6 + length {
        anyhow::bail!("Frame length mismatch: header says {}, got {}", length, raw.len() - 6);
    }

    let (body, crc) = raw.split_at(4 + length);
    let expected = CRC.checksum(body);
    let received = u16::from_le_bytes([crc[0], crc[1]]);
    if expected != received {
        anyhow::bail!("CRC mismatch: expected {:04x}, got {:04x}", expected, received);
    }
    if raw[0] != BRIDGE_PROTOCOL_VERSION {
        anyhow::bail!("Bridge protocol version {} not supported", raw[0]);
    }

    let reply = BridgeReply::try_from(raw[1])
        .map_err(|v| anyhow::anyhow!("Unknown reply ID: {:#04x}", v))?;

    Ok(BridgeFrame {
        reply,
        payload: body[4..].to_vec(),
    })
}

/// Parsed `STAT:` report from the node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStatus {
    pub mode: String,
    pub power: String,
    pub brightness: u8,
    pub rgb: (u8, u8, u8),
    pub preset: String,
    pub lux: Option<f64>,
}

/// Value of `NAME=value` in a status body.
fn status_field<'a>(body: &'a str, name: &str) -> anyhow::Result<&'a str> {
    body.split_whitespace()
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
        .ok_or_else(|| anyhow::anyhow!("Missing {} in {}", name, body))
}

/// Parse `STAT:MODE=.. POWER=.. BRI=.. RGB=r,g,b PRESET=.. LUX=..`.
pub fn parse_status(text: &str) -> anyhow::Result<NodeStatus> {
    let body = text
        .strip_prefix("STAT:")
        .ok_or_else(|| anyhow::anyhow!("Not a status report: {}", text))?;

    let rgb: Vec<u8> = status_field(body, "RGB")?
        .split(',')
        .map(|c| c.parse::<u8>())
        .collect::<Result<_, _>>()?;
    if rgb.len() != 3 {
        anyhow::bail!("RGB needs three channels: {}", text);
    }

    let lux = match status_field(body, "LUX")? {
        "NA" => None,
        value => Some(value.parse::<f64>()?),
    };

    Ok(NodeStatus {
        mode: status_field(body, "MODE")?.to_string(),
        power: status_field(body, "POWER")?.to_string(),
        brightness: status_field(body, "BRI")?.parse::<u8>()?,
        rgb: (rgb[0], rgb[1], rgb[2]),
        preset: status_field(body, "PRESET")?.to_string(),
        lux,
    })
}
