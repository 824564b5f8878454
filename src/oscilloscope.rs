//! Typed helpers for the oscilloscope endpoints.
//!
//! The first request to any of these endpoints deploys the oscilloscope on
//! the device if it is not already running.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::session::{SessionClient, SessionError};

/// Oscilloscope endpoints rooted at `oscilloscope/` or `slot{n}/oscilloscope/`.
#[derive(Clone, Debug)]
pub struct Oscilloscope<'a> {
    session: &'a SessionClient,
    root: String,
}

impl<'a> Oscilloscope<'a> {
    pub(crate) fn new(session: &'a SessionClient, slot: Option<u8>) -> Self {
        let root = match slot {
            Some(slot) => format!("slot{slot}/oscilloscope/"),
            None => "oscilloscope/".to_string(),
        };
        Self { session, root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Configures one input channel. The device echoes the applied settings.
    pub async fn set_frontend(
        &self,
        settings: &FrontendSettings,
    ) -> Result<AppliedFrontend, SessionError> {
        self.session
            .post_as(&self.path("set_frontend"), settings)
            .await
    }

    /// Sets the capture window in seconds relative to the trigger point.
    pub async fn set_timebase(&self, t1: f64, t2: f64) -> Result<Value, SessionError> {
        self.session
            .post(&self.path("set_timebase"), &TimebaseRequest { t1, t2 })
            .await
    }

    /// Fetches one frame. With `wait_reacquire` the device waits for a fresh
    /// acquisition instead of returning the latest one.
    pub async fn get_data(&self, wait_reacquire: bool) -> Result<Frame, SessionError> {
        self.session
            .post_as(&self.path("get_data"), &GetDataRequest { wait_reacquire })
            .await
    }

    fn path(&self, operation: &str) -> String {
        format!("{}{}", self.root, operation)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum Coupling {
    #[serde(rename = "AC")]
    Ac,
    #[serde(rename = "DC")]
    Dc,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub enum Impedance {
    #[serde(rename = "1MOhm")]
    OneMegaohm,
    #[serde(rename = "50Ohm")]
    FiftyOhm,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FrontendSettings {
    pub channel: u8,
    /// Input range as the device names it, e.g. `"10Vpp"` or `"400mVpp"`.
    pub range: String,
    pub coupling: Coupling,
    pub impedance: Impedance,
}

/// Frontend settings as reported back by the device.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppliedFrontend {
    pub range: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize)]
struct TimebaseRequest {
    t1: f64,
    t2: f64,
}

#[derive(Serialize)]
struct GetDataRequest {
    wait_reacquire: bool,
}

/// One captured frame: a `time` axis plus one sample sequence per channel,
/// aligned by index.
///
/// Keys that are not numeric sequences (a disabled channel reported as
/// `null`, frame metadata) land in `extra` instead of failing the decode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(from = "RawFrame")]
pub struct Frame {
    pub time: Vec<f64>,
    #[serde(flatten)]
    pub channels: BTreeMap<String, Vec<f64>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawFrame {
    time: Vec<f64>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl From<RawFrame> for Frame {
    fn from(raw: RawFrame) -> Self {
        let mut channels = BTreeMap::new();
        let mut extra = Map::new();
        for (key, value) in raw.rest {
            match value {
                Value::Array(items) if items.iter().all(Value::is_number) => {
                    let samples = items.iter().filter_map(Value::as_f64).collect();
                    channels.insert(key, samples);
                }
                other => {
                    extra.insert(key, other);
                }
            }
        }

        Self {
            time: raw.time,
            channels,
            extra,
        }
    }
}

impl Frame {
    pub fn channel(&self, name: &str) -> Option<&[f64]> {
        self.channels.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// True when every channel has exactly one sample per time point.
    pub fn is_aligned(&self) -> bool {
        self.channels
            .values()
            .all(|samples| samples.len() == self.time.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AppliedFrontend, Coupling, Frame, FrontendSettings, Impedance};

    #[test]
    fn frontend_settings_serialize_wire_names() {
        let settings = FrontendSettings {
            channel: 1,
            range: "10Vpp".to_string(),
            coupling: Coupling::Ac,
            impedance: Impedance::OneMegaohm,
        };

        let value = serde_json::to_value(settings).expect("serialize settings");
        assert_eq!(
            value,
            json!({"channel":1,"range":"10Vpp","coupling":"AC","impedance":"1MOhm"})
        );
    }

    #[test]
    fn applied_frontend_keeps_unknown_fields() {
        let applied: AppliedFrontend =
            serde_json::from_value(json!({"range":"10Vpp","impedance":"50Ohm"}))
                .expect("decode applied frontend");
        assert_eq!(applied.range, "10Vpp");
        assert_eq!(applied.extra.get("impedance"), Some(&json!("50Ohm")));
    }

    #[test]
    fn frame_splits_time_from_channels() {
        let frame: Frame = serde_json::from_value(json!({
            "time": [-0.005, -0.004, -0.003],
            "ch1": [0.0, 0.1, 0.2],
            "ch2": [1, 2, 3]
        }))
        .expect("decode frame");

        assert_eq!(frame.len(), 3);
        assert_eq!(frame.channel("ch1"), Some(&[0.0, 0.1, 0.2][..]));
        assert_eq!(frame.channel("ch2"), Some(&[1.0, 2.0, 3.0][..]));
        assert!(frame.channel("time").is_none());
        assert!(frame.is_aligned());
    }

    #[test]
    fn frame_tolerates_disabled_channels_and_metadata() {
        let frame: Frame = serde_json::from_value(json!({
            "time": [0.0, 0.1],
            "ch1": [0.5, 0.6],
            "ch2": null,
            "ch3": ["n/a"],
            "waveid": 17
        }))
        .expect("decode frame with extra keys");

        assert_eq!(frame.channel("ch1"), Some(&[0.5, 0.6][..]));
        assert!(frame.channel("ch2").is_none());
        assert_eq!(frame.extra.get("ch2"), Some(&json!(null)));
        assert_eq!(frame.extra.get("ch3"), Some(&json!(["n/a"])));
        assert_eq!(frame.extra.get("waveid"), Some(&json!(17)));
        assert!(frame.is_aligned());
    }

    #[test]
    fn frame_detects_misaligned_channel() {
        let frame: Frame = serde_json::from_value(json!({
            "time": [0.0, 0.1],
            "ch1": [0.0]
        }))
        .expect("decode frame");
        assert!(!frame.is_aligned());
    }
}
