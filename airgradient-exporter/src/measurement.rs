//! AirGradient measurement snapshot and its JSON decoding.
//!
//! The device's `/measures/current` endpoint returns a flat JSON object.
//! Firmware versions differ in which keys they report, so every field is
//! optional on the wire: a missing key or an explicit `null` decodes to the
//! zero value, and keys this crate does not know are ignored.

use serde::{Deserialize, Deserializer};

/// One decoded snapshot of the device's current measurements.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    // Particulate matter, atmospheric environment (ug/m3)
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm01: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm02: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm10: f64,

    // Particulate matter, standard particle (ug/m3)
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm01_standard: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm02_standard: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm10_standard: f64,

    // Particle counts per dL
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm003_count: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm005_count: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm01_count: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm02_count: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm50_count: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm10_count: f64,

    /// PM2.5 with temperature/humidity compensation (firmware 3.1.4+).
    #[serde(default, deserialize_with = "null_as_default")]
    pub pm02_compensated: f64,

    // Environment
    #[serde(default, deserialize_with = "null_as_default")]
    pub atmp: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub atmp_compensated: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rhum: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rhum_compensated: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rco2: f64,

    // Sensirion VOC / NOx
    #[serde(default, deserialize_with = "null_as_default")]
    pub tvoc_index: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tvoc_raw: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nox_index: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nox_raw: f64,

    // Device telemetry
    #[serde(default, deserialize_with = "null_as_default")]
    pub boot: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub boot_count: i64,
    /// Wi-Fi RSSI in dBm.
    #[serde(default, deserialize_with = "null_as_default")]
    pub wifi: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub led_mode: String,
    #[serde(default, rename = "serialno", deserialize_with = "null_as_default")]
    pub serial_no: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub firmware: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
}

impl Measurement {
    /// Decode a measurement from a JSON response body.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
