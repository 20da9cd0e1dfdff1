//! Sensor reading data model.
//!
//! Every field of a reading is optional: producers may omit any of them, and
//! an absent value must stay distinguishable from a zero measurement all the
//! way to the query API.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

/// Errors raised while decoding an inbound sensor message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not a UTF-8 JSON object with the expected field types.
    #[error("Malformed sensor payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A reading as published by a sensor, before the store assigns it an id.
///
/// Wire format: `{ "temperature": number, "humidity": number, "heatIndex": number, "timestamp": integer }`
/// with any subset of fields present. Unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    /// Temperature, in whatever unit the producer uses.
    pub temperature: Option<f64>,

    /// Relative humidity in percent.
    pub humidity: Option<f64>,

    /// Heat index computed by the producer.
    #[serde(rename = "heatIndex")]
    pub heat_index: Option<f64>,

    /// Producer-supplied epoch seconds. Not checked against wall-clock time.
    pub timestamp: Option<i64>,
}

impl NewReading {
    /// Decode a sensor message payload.
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encode this reading in the sensor wire format.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Attach a store-assigned id.
    pub fn with_id(self, id: i64) -> Reading {
        Reading {
            id,
            temperature: self.temperature,
            humidity: self.humidity,
            heat_index: self.heat_index,
            timestamp: self.timestamp,
        }
    }
}

/// A stored reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Insertion-order id assigned by the store.
    pub id: i64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub heat_index: Option<f64>,
    pub timestamp: Option<i64>,
}
