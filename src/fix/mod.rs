use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer};


/// Format of the `time` column and the console status line (local time)
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One device record as written by the producer app.
///
/// Only the fields the tracker uses are declared; everything else in the
/// record (battery, product info, safe locations, ...) is ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Device {
    /// Stable per-device identifier
    #[serde(deserialize_with = "null_as_default")]
    pub identifier: String,

    /// User-facing display name (e.g., "Keys")
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,

    /// Last known location, null for devices that have never reported
    pub location: Option<Location>,

    /// Reverse-geocoded address of `location`
    pub address: Option<Address>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Location {
    #[serde(deserialize_with = "null_as_default")]
    pub latitude: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub longitude: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub horizontal_accuracy: f64,

    /// Unix epoch milliseconds (producer clock)
    #[serde(deserialize_with = "null_as_default")]
    pub time_stamp: i64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Address {
    /// Street name without house number
    #[serde(deserialize_with = "null_as_default")]
    pub street_name: String,

    /// House number
    #[serde(deserialize_with = "null_as_default")]
    pub street_address: String,

    #[serde(deserialize_with = "null_as_default")]
    pub locality: String,
    #[serde(deserialize_with = "null_as_default")]
    pub country: String,

    /// Single-line address shown on the console
    #[serde(deserialize_with = "null_as_default")]
    pub map_item_full_address: String,
}

/// Treat an explicit `null` like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Immutable location observation for one entity
#[derive(Clone, Debug, PartialEq)]
pub struct LocationFix {
    pub entity_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub horizontal_accuracy: f64,
    pub street: String,
    pub number: String,
    pub city: String,
    pub country: String,
    pub full_address: String,

    /// Unix epoch milliseconds (producer clock)
    pub timestamp_ms: i64,
}

impl Device {
    /// Convert to a fix. Returns None for records without a usable location.
    pub fn into_fix(self) -> Option<LocationFix> {
        let location = self.location?;
        if location.time_stamp == 0 {
            return None;
        }
        let address = self.address.unwrap_or_default();

        Some(LocationFix {
            entity_id: self.identifier,
            name: self.name,
            latitude: location.latitude,
            longitude: location.longitude,
            horizontal_accuracy: location.horizontal_accuracy,
            street: address.street_name,
            number: address.street_address,
            city: address.locality,
            country: address.country,
            full_address: address.map_item_full_address,
            timestamp_ms: location.time_stamp,
        })
    }
}

impl LocationFix {
    /// Event time in local time, truncated to whole seconds.
    ///
    /// Logs store second resolution, so every duplicate comparison works on
    /// this value rather than the raw millisecond timestamp.
    pub fn event_time(&self) -> Result<DateTime<Local>> {
        let secs = self.timestamp_ms.div_euclid(1000);
        let utc = DateTime::from_timestamp(secs, 0).with_context(|| {
            format!(
                "Timestamp {} for entity {} is out of range",
                self.timestamp_ms, self.entity_id
            )
        })?;
        Ok(utc.with_timezone(&Local))
    }

    /// Whether the display name matches `filter` (case-insensitive, exact)
    pub fn matches_name(&self, filter: &str) -> bool {
        self.name.to_lowercase() == filter.to_lowercase()
    }
}

/// Format a timestamp the way it appears in logs and on the console
pub fn format_time(time: &DateTime<Local>) -> String {
    time.format(TIME_FORMAT).to_string()
}

/// Parse a `time` column value back into a local timestamp
pub fn parse_time(value: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), TIME_FORMAT)
        .with_context(|| format!("Invalid log timestamp {:?}", value))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .with_context(|| format!("Log timestamp {:?} does not exist in local time", value))
}
