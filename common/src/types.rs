use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    address::DeviceAddress,
    schedule::RelaySchedule,
    time::{self, TimeError, NO_TIME},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RelayId {
    One,
    Two,
}

impl RelayId {
    pub const ALL: [RelayId; 2] = [RelayId::One, RelayId::Two];

    pub fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }

    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            _ => None,
        }
    }
}

impl TryFrom<u8> for RelayId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_number(value).ok_or_else(|| format!("relay must be 1 or 2, got {value}"))
    }
}

impl FromStr for RelayId {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let number = text
            .trim()
            .parse::<u8>()
            .map_err(|_| format!("relay must be 1 or 2, got {text:?}"))?;
        Self::try_from(number)
    }
}

impl From<RelayId> for u8 {
    fn from(relay: RelayId) -> Self {
        relay.number()
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayControlMode {
    #[default]
    Timer,
    Manual,
}

impl RelayControlMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "TIMER",
            Self::Manual => "MANUAL",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayModes {
    pub relay1: RelayControlMode,
    pub relay2: RelayControlMode,
}

impl RelayModes {
    pub fn get(&self, relay: RelayId) -> RelayControlMode {
        match relay {
            RelayId::One => self.relay1,
            RelayId::Two => self.relay2,
        }
    }

    pub fn set(&mut self, relay: RelayId, mode: RelayControlMode) {
        match relay {
            RelayId::One => self.relay1 = mode,
            RelayId::Two => self.relay2 = mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "address", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(DeviceAddress),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected(_) => "CONNECTED",
        }
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        match self {
            Self::Connected(address) => Some(*address),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub on: bool,
    pub schedule: RelaySchedule,
    #[serde(rename = "overrideActive")]
    pub override_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    #[serde(rename = "currentTime")]
    pub current_time: i32,
    pub relays: [RelayStatus; 2],
}

impl DeviceStatus {
    pub fn relay(&self, relay: RelayId) -> &RelayStatus {
        &self.relays[relay.index()]
    }

    pub fn relay_mut(&mut self, relay: RelayId) -> &mut RelayStatus {
        &mut self.relays[relay.index()]
    }

    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        let payload = serde_json::from_slice::<StatusPayload>(raw)?;
        Self::try_from(payload).map_err(serde::de::Error::custom)
    }
}

/// `/status` body as the firmware sends it. Relay state arrives as `0/1` or as
/// a boolean depending on firmware build; both decode to `bool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(deserialize_with = "deserialize_flag", serialize_with = "serialize_state")]
    pub r1: bool,
    #[serde(deserialize_with = "deserialize_flag", serialize_with = "serialize_state")]
    pub r2: bool,
    pub time: i32,
    #[serde(default = "unset_time")]
    pub r1_on: i32,
    #[serde(default = "unset_time")]
    pub r1_off: i32,
    #[serde(default = "unset_time")]
    pub r2_on: i32,
    #[serde(default = "unset_time")]
    pub r2_off: i32,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub r1_override: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub r2_override: bool,
}

fn unset_time() -> i32 {
    NO_TIME
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
    Float(f64),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let flag = Option::<Flag>::deserialize(deserializer)?;
    Ok(match flag {
        Some(Flag::Bool(value)) => value,
        Some(Flag::Int(value)) => value != 0,
        Some(Flag::Float(value)) => value != 0.0,
        None => false,
    })
}

fn serialize_state<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u8(u8::from(*value))
}

impl TryFrom<StatusPayload> for DeviceStatus {
    type Error = TimeError;

    fn try_from(payload: StatusPayload) -> Result<Self, Self::Error> {
        time::decode(payload.time)?;
        for value in [payload.r1_on, payload.r1_off, payload.r2_on, payload.r2_off] {
            if value != NO_TIME {
                time::decode(value)?;
            }
        }

        Ok(Self {
            current_time: payload.time,
            relays: [
                RelayStatus {
                    on: payload.r1,
                    schedule: RelaySchedule::new(payload.r1_on, payload.r1_off),
                    override_active: payload.r1_override,
                },
                RelayStatus {
                    on: payload.r2,
                    schedule: RelaySchedule::new(payload.r2_on, payload.r2_off),
                    override_active: payload.r2_override,
                },
            ],
        })
    }
}

impl From<&DeviceStatus> for StatusPayload {
    fn from(status: &DeviceStatus) -> Self {
        let [r1, r2] = status.relays;
        Self {
            r1: r1.on,
            r2: r2.on,
            time: status.current_time,
            r1_on: r1.schedule.on_time,
            r1_off: r1.schedule.off_time,
            r2_on: r2.schedule.on_time,
            r2_off: r2.schedule.off_time,
            r1_override: r1.override_active,
            r2_override: r2.override_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(alias = "name")]
    pub device: String,
    #[serde(default)]
    pub relays: Option<u8>,
    #[serde(default)]
    pub version: Option<String>,
}

impl DeviceInfo {
    pub fn matches(&self, device_name: &str) -> bool {
        self.device.trim().eq_ignore_ascii_case(device_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_integer_relay_state() {
        let raw = br#"{"r1":1,"r2":0,"time":800,"r1_on":800,"r1_off":1800,"r2_on":-1,"r2_off":-1}"#;
        let status = DeviceStatus::from_json(raw).unwrap();

        assert_eq!(status.current_time, 800);
        assert!(status.relay(RelayId::One).on);
        assert!(!status.relay(RelayId::Two).on);
        assert_eq!(
            status.relay(RelayId::One).schedule,
            RelaySchedule::new(800, 1800)
        );
        assert!(!status.relay(RelayId::Two).schedule.is_active());
        assert!(!status.relay(RelayId::One).override_active);
    }

    #[test]
    fn decodes_boolean_relay_state_and_overrides() {
        let raw = br#"{"r1":false,"r2":true,"time":1234,"r1_on":0,"r1_off":0,"r2_on":2200,"r2_off":600,"r1_override":true,"r2_override":false}"#;
        let status = DeviceStatus::from_json(raw).unwrap();

        assert!(!status.relay(RelayId::One).on);
        assert!(status.relay(RelayId::Two).on);
        assert!(status.relay(RelayId::One).override_active);
        assert!(status.relay(RelayId::One).schedule.is_neutral());
    }

    #[test]
    fn rejects_non_status_documents() {
        assert!(DeviceStatus::from_json(b"<html></html>").is_err());
        assert!(DeviceStatus::from_json(br#"{"r1":"on","r2":0,"time":0}"#).is_err());
    }

    #[test]
    fn rejects_out_of_range_clock_and_schedule_values() {
        assert!(DeviceStatus::from_json(br#"{"r1":0,"r2":0,"time":2500}"#).is_err());
        assert!(DeviceStatus::from_json(br#"{"r1":0,"r2":0,"time":-1}"#).is_err());
        assert!(DeviceStatus::from_json(br#"{"r1":0,"r2":0,"time":800,"r1_on":860}"#).is_err());
        assert!(DeviceStatus::from_json(br#"{"r1":0,"r2":0,"time":0,"r2_off":-1}"#).is_ok());
    }

    #[test]
    fn relay_modes_default_to_timer() {
        let mut modes: RelayModes = serde_json::from_str(r#"{"relay2":"MANUAL"}"#).unwrap();
        assert_eq!(modes.get(RelayId::One), RelayControlMode::Timer);
        assert_eq!(modes.get(RelayId::Two), RelayControlMode::Manual);

        modes.set(RelayId::Two, RelayControlMode::Timer);
        assert_eq!(modes, RelayModes::default());
    }

    #[test]
    fn payload_serializes_state_as_integers() {
        let status = DeviceStatus::from_json(br#"{"r1":true,"r2":false,"time":5}"#).unwrap();
        let value = serde_json::to_value(StatusPayload::from(&status)).unwrap();

        assert_eq!(value["r1"], 1);
        assert_eq!(value["r2"], 0);
        assert_eq!(value["r1_on"], -1);
        assert_eq!(value["r1_override"], false);
    }

    #[test]
    fn relay_id_round_trips_through_numbers() {
        assert_eq!(RelayId::try_from(2), Ok(RelayId::Two));
        assert!(RelayId::try_from(3).is_err());
        assert_eq!(serde_json::to_string(&RelayId::One).unwrap(), "1");
        assert_eq!(" 1".parse::<RelayId>(), Ok(RelayId::One));
        assert!("one".parse::<RelayId>().is_err());
    }

    #[test]
    fn info_matches_device_name_case_insensitively() {
        let info: DeviceInfo = serde_json::from_str(r#"{"name":"powermate"}"#).unwrap();
        assert!(info.matches("PowerMate"));
        assert!(!info.matches("Shelly"));
    }
}
