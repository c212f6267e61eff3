//! Line format spoken by the RFLink gateway
//!
//! Inbound lines look like
//!
//! ```text
//! 20;2D;NewKaku;ID=0000c6c2;SWITCH=1;CMD=ON;
//! 20;3B;Oregon TempHygro;ID=0ACC;TEMP=00be;HUM=40;BAT=OK;
//! 20;01;OK;
//! ```
//!
//! and outbound commands as
//!
//! ```text
//! 10;newkaku;0000c6c2;1;ON;
//! ```

use crate::event::RflinkEvent;
use serde_json::{json, Value};
use thiserror::Error;

const INBOUND_NODE: &str = "20";
const OUTBOUND_NODE: &str = "10";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("not a gateway packet: {0:?}")]
    NotAPacket(String),

    #[error("device id '{0}' must be <protocol>_<address>[_<switch>]")]
    BadDeviceId(String),

    #[error("command must not be empty")]
    EmptyCommand,
}

/// A decoded inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// `OK`: the previous command was transmitted
    Ack,
    /// `CMD UNKNOWN`: the previous command was refused
    Nack,
    Pong,
    /// Firmware banner sent after connect or reset
    Banner(String),
    /// A radio frame from some device
    Device {
        protocol: String,
        fields: Vec<(String, String)>,
    },
    /// Anything else the gateway reports (debug output, version fields)
    Other(String),
}

/// Decode one line, without its line terminator
pub fn decode(line: &str) -> Result<Packet, PacketError> {
    let line = line.trim();
    let mut parts = line.trim_end_matches(';').split(';');

    if parts.next() != Some(INBOUND_NODE) {
        return Err(PacketError::NotAPacket(line.to_string()));
    }
    let (Some(_sequence), Some(name)) = (parts.next(), parts.next()) else {
        return Err(PacketError::NotAPacket(line.to_string()));
    };

    let fields: Vec<(String, String)> = parts
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.to_ascii_uppercase(), v.to_string()))
        .collect();

    if fields.is_empty() {
        return Ok(match name {
            "OK" => Packet::Ack,
            "CMD UNKNOWN" => Packet::Nack,
            "PONG" => Packet::Pong,
            n if n.starts_with("Nodo RadioFrequencyLink") => Packet::Banner(n.to_string()),
            n => Packet::Other(n.to_string()),
        });
    }
    if name.contains('=') {
        // `20;00;VER=1.1;REV=46;` style status lines
        return Ok(Packet::Other(line.to_string()));
    }

    Ok(Packet::Device {
        protocol: name.to_string(),
        fields,
    })
}

/// `<protocol>_<id>[_<switch>]`, lowercase, protocol without spaces or dashes
pub fn device_id(protocol: &str, id: &str, switch: Option<&str>) -> String {
    let protocol: String = protocol
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect::<String>()
        .to_lowercase();
    match switch {
        Some(switch) => format!("{}_{}_{}", protocol, id.to_lowercase(), switch.to_lowercase()),
        None => format!("{}_{}", protocol, id.to_lowercase()),
    }
}

impl Packet {
    /// Device events carried by this packet. Non-device packets carry none.
    pub fn events(&self) -> Vec<RflinkEvent> {
        let Packet::Device { protocol, fields } = self else {
            return Vec::new();
        };
        let field = |key: &str| {
            fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let Some(id) = field("ID") else {
            return Vec::new();
        };
        let packet_id = device_id(protocol, id, field("SWITCH"));

        let mut events = Vec::new();
        if let Some(cmd) = field("CMD") {
            events.push(RflinkEvent::command(packet_id.clone(), cmd.to_lowercase()));
        }

        for (key, raw) in fields {
            let Some(reading) = SENSOR_FIELDS.iter().find(|r| r.key == key) else {
                continue;
            };
            if let Some(value) = reading.decoder.decode(raw) {
                events.push(RflinkEvent::sensor(
                    format!("{}_{}", packet_id, key.to_lowercase()),
                    reading.sensor,
                    value,
                    reading.unit.map(str::to_string),
                ));
            }
        }
        events
    }
}

/// Build the outbound line for a command, without line terminator
pub fn encode_command(device_id: &str, command: &str) -> Result<String, PacketError> {
    if command.is_empty() {
        return Err(PacketError::EmptyCommand);
    }
    let mut parts = device_id.splitn(3, '_');
    let (Some(protocol), Some(address)) = (parts.next(), parts.next()) else {
        return Err(PacketError::BadDeviceId(device_id.to_string()));
    };
    if protocol.is_empty() || address.is_empty() {
        return Err(PacketError::BadDeviceId(device_id.to_string()));
    }

    let command = command.to_uppercase();
    Ok(match parts.next() {
        Some(switch) => format!("{OUTBOUND_NODE};{protocol};{address};{switch};{command};"),
        None => format!("{OUTBOUND_NODE};{protocol};{address};{command};"),
    })
}

#[derive(Debug, Clone, Copy)]
enum Decoder {
    /// Hex tenths with bit 15 as sign (`TEMP=80be` is -19.0)
    SignedTenthsHex,
    HexTenths,
    Hex,
    Decimal,
    /// 0-15 compass steps of 22.5 degrees
    WindDirection,
    Text,
}

impl Decoder {
    fn decode(self, raw: &str) -> Option<Value> {
        match self {
            Decoder::SignedTenthsHex => {
                let v = u16::from_str_radix(raw, 16).ok()?;
                let magnitude = f64::from(v & 0x7fff) / 10.0;
                Some(json!(if v & 0x8000 != 0 { -magnitude } else { magnitude }))
            }
            Decoder::HexTenths => {
                let v = u32::from_str_radix(raw, 16).ok()?;
                Some(json!(f64::from(v) / 10.0))
            }
            Decoder::Hex => u32::from_str_radix(raw, 16).ok().map(|v| json!(v)),
            Decoder::Decimal => raw.parse::<i64>().ok().map(|v| json!(v)),
            Decoder::WindDirection => raw
                .parse::<u8>()
                .ok()
                .filter(|v| *v < 16)
                .map(|v| json!(f64::from(v) * 22.5)),
            Decoder::Text => Some(json!(raw.to_lowercase())),
        }
    }
}

struct SensorField {
    key: &'static str,
    sensor: &'static str,
    unit: Option<&'static str>,
    decoder: Decoder,
}

const fn reading(
    key: &'static str,
    sensor: &'static str,
    unit: Option<&'static str>,
    decoder: Decoder,
) -> SensorField {
    SensorField {
        key,
        sensor,
        unit,
        decoder,
    }
}

const SENSOR_FIELDS: &[SensorField] = &[
    reading("TEMP", "temperature", Some("°C"), Decoder::SignedTenthsHex),
    reading("HUM", "humidity", Some("%"), Decoder::Decimal),
    reading("HSTATUS", "humidity_status", None, Decoder::Decimal),
    reading("BARO", "barometric_pressure", Some("hPa"), Decoder::Hex),
    reading("BFORECAST", "weather_forecast", None, Decoder::Decimal),
    reading("UV", "uv_intensity", None, Decoder::Hex),
    reading("LUX", "light_intensity", Some("lx"), Decoder::Hex),
    reading("BAT", "battery", None, Decoder::Text),
    reading("RAIN", "total_rain", Some("mm"), Decoder::HexTenths),
    reading("RAINRATE", "rain_rate", Some("mm"), Decoder::HexTenths),
    reading("WINSP", "windspeed", Some("km/h"), Decoder::HexTenths),
    reading("AWINSP", "average_windspeed", Some("km/h"), Decoder::HexTenths),
    reading("WINGS", "windgusts", Some("km/h"), Decoder::HexTenths),
    reading("WINDIR", "winddirection", Some("°"), Decoder::WindDirection),
    reading("WINCHL", "windchill", Some("°C"), Decoder::SignedTenthsHex),
    reading("WINTMP", "windtemp", Some("°C"), Decoder::SignedTenthsHex),
    reading("CHIME", "doorbell_melody", None, Decoder::Decimal),
    reading("WATT", "watt", Some("W"), Decoder::Hex),
    reading("KWATT", "kilowatt", Some("kW"), Decoder::Hex),
    reading("CO2", "co2_air_quality", Some("ppm"), Decoder::Decimal),
    reading("SOUND", "noise_level", None, Decoder::Decimal),
    reading("DIST", "distance", None, Decoder::Decimal),
    reading("METER", "meter_value", None, Decoder::Decimal),
    reading("VOLT", "voltage", Some("V"), Decoder::Decimal),
    reading("CURRENT", "current_phase_1", Some("A"), Decoder::Decimal),
];
