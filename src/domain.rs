use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// fallback values served while the store holds no readings
pub const FALLBACK_TEMPERATURE: f64 = 24.5;
pub const FALLBACK_PH: f64 = 6.2;
pub const FALLBACK_EC: f64 = 1.8;
pub const FALLBACK_WATER_LEVEL: f64 = 85.0;

/// one stored sensor reading
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// nutrient solution temperature in celsius
    pub temperature: f64,
    pub ph: f64,
    /// electrical conductivity in mS/cm
    pub ec: f64,
    /// reservoir fill level, 0-100 %
    pub water_level: f64,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// the documented "nothing stored yet" reading
    pub fn fallback(now: DateTime<Utc>) -> Self {
        Self {
            temperature: FALLBACK_TEMPERATURE,
            ph: FALLBACK_PH,
            ec: FALLBACK_EC,
            water_level: FALLBACK_WATER_LEVEL,
            timestamp: now,
        }
    }
}

/// a validated, not yet stored reading
#[derive(Clone, Debug, PartialEq)]
pub struct ReadingPayload {
    pub temperature: f64,
    pub ph: f64,
    pub ec: f64,
    pub water_level: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

const MEASUREMENT_FIELDS: [&str; 4] = ["temperature", "ph", "ec", "waterLevel"];

impl ReadingPayload {
    /// validate an incoming json body.
    /// the error names the first offending field, checked in declaration order.
    pub fn from_json(body: &Value) -> Result<Self, String> {
        let object = body
            .as_object()
            .ok_or_else(|| "\"value\" must be of type object".to_string())?;

        let temperature = number_field(object, "temperature")?;
        let ph = number_field(object, "ph")?;
        let ec = number_field(object, "ec")?;
        let water_level = number_field(object, "waterLevel")?;
        if !(0.0..=100.0).contains(&water_level) {
            return Err("\"waterLevel\" must be between 0 and 100".to_string());
        }

        let timestamp = match object.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| "\"timestamp\" must be a valid RFC 3339 date".to_string())?
                    .with_timezone(&Utc),
            ),
            Some(Value::Number(ms)) => Some(
                ms.as_i64()
                    .and_then(DateTime::from_timestamp_millis)
                    .ok_or_else(|| "\"timestamp\" must be a valid RFC 3339 date".to_string())?,
            ),
            Some(_) => return Err("\"timestamp\" must be a valid RFC 3339 date".to_string()),
        };

        if let Some(unknown) = object
            .keys()
            .find(|key| !MEASUREMENT_FIELDS.contains(&key.as_str()) && key.as_str() != "timestamp")
        {
            return Err(format!("\"{}\" is not allowed", unknown));
        }

        Ok(Self { temperature, ph, ec, water_level, timestamp })
    }

    /// stamp the payload, truncating to the millisecond precision the store keeps
    pub fn into_reading(self, now: DateTime<Utc>) -> SensorReading {
        SensorReading {
            temperature: self.temperature,
            ph: self.ph,
            ec: self.ec,
            water_level: self.water_level,
            timestamp: truncate_to_millis(self.timestamp.unwrap_or(now)),
        }
    }
}

fn number_field(object: &Map<String, Value>, name: &str) -> Result<f64, String> {
    match object.get(name) {
        None | Some(Value::Null) => Err(format!("\"{}\" is required", name)),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| format!("\"{}\" must be a number", name)),
        Some(_) => Err(format!("\"{}\" must be a number", name)),
    }
}

pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// value carried by a control command. its meaning belongs to the actuator.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Number(Number),
    Text(String),
}

impl ControlValue {
    /// accepts booleans, numbers and strings; anything else is rejected
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// an operator action, stamped when it is relayed. never persisted.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ControlCommand {
    /// free-form actuator key ("pump", "lights", "dosing", ...)
    pub action: String,
    pub value: ControlValue,
    pub timestamp: DateTime<Utc>,
}

/// everything pushed over the real-time channel
///
/// wire form: `{"event": "sensorUpdate", "data": {...}}`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Event {
    SensorUpdate(SensorReading),
    ControlUpdate(ControlCommand),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SensorUpdate(_) => "sensorUpdate",
            Self::ControlUpdate(_) => "controlUpdate",
        }
    }
}
