//! `ludari-lens` — structured per-execution log/metric sink.
//!
//! A `Lens` is handed to every job execution. The execution captures titled
//! frames (errors, info lines, metrics); when the job persists a run record
//! the serialized frame array becomes the run's result unless the execution
//! returned a value of its own.
//!
//! The buffer uses interior mutability so one `Arc<Lens>` can be shared
//! with an execution closure while the pipeline reads it afterwards.

use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LensError {
    /// The only failure mode: a frame without a non-empty title.
    #[error("frame title must be a non-empty string")]
    MissingTitle,
}

pub type Result<T> = std::result::Result<T, LensError>;

/// Severity of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameLevel {
    Error,
    #[serde(alias = "warning")]
    Warn,
    Info,
    Debug,
    Metric,
}

/// One captured event.
///
/// `title` is the only required field; everything else is optional and
/// unknown keys ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<FrameLevel>,
    /// Error type name, for frames captured from a structured error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Error source chain, for frames captured from a structured error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(rename = "metricName", skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(rename = "metricValue", skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
    #[serde(rename = "metricUnit", skip_serializing_if = "Option::is_none")]
    pub metric_unit: Option<String>,
    /// ISO-8601 capture time; assigned at capture when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Frame {
    /// A frame with only a title set.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: None,
            level: None,
            name: None,
            stack: None,
            metric_name: None,
            metric_value: None,
            metric_unit: None,
            timestamp: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_level(mut self, level: FrameLevel) -> Self {
        self.level = Some(level);
        self
    }
}

/// Growable ordered frame buffer.
#[derive(Debug, Default)]
pub struct Lens {
    frames: Mutex<Vec<Frame>>,
}

impl Lens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a frame. Rejects frames whose title is missing or blank;
    /// assigns the capture timestamp when the frame carries none.
    pub fn capture(&self, mut frame: Frame) -> Result<()> {
        if frame.title.trim().is_empty() {
            return Err(LensError::MissingTitle);
        }
        if frame.timestamp.is_none() {
            frame.timestamp = Some(Utc::now().to_rfc3339());
        }
        self.frames.lock().expect("lens poisoned").push(frame);
        Ok(())
    }

    /// Capture an error frame from a plain message.
    pub fn capture_error(&self, message: impl Into<String>, title: impl Into<String>) -> Result<()> {
        self.capture(
            Frame::titled(title)
                .with_message(message)
                .with_level(FrameLevel::Error),
        )
    }

    /// Capture an error frame from a structured error, recording its
    /// message, source chain, and concrete type name.
    pub fn capture_error_from<E>(&self, error: &E, title: impl Into<String>) -> Result<()>
    where
        E: std::error::Error,
    {
        let mut frame = Frame::titled(title)
            .with_message(error.to_string())
            .with_level(FrameLevel::Error);
        frame.name = Some(std::any::type_name::<E>().to_string());
        frame.stack = source_chain(error);
        self.capture(frame)
    }

    pub fn capture_info(&self, message: impl Into<String>, title: impl Into<String>) -> Result<()> {
        self.capture(
            Frame::titled(title)
                .with_message(message)
                .with_level(FrameLevel::Info),
        )
    }

    pub fn capture_warn(&self, message: impl Into<String>, title: impl Into<String>) -> Result<()> {
        self.capture(
            Frame::titled(title)
                .with_message(message)
                .with_level(FrameLevel::Warn),
        )
    }

    pub fn capture_debug(&self, message: impl Into<String>, title: impl Into<String>) -> Result<()> {
        self.capture(
            Frame::titled(title)
                .with_message(message)
                .with_level(FrameLevel::Debug),
        )
    }

    /// Capture a metric frame titled `Metric: <name>`.
    pub fn capture_metric(
        &self,
        name: impl Into<String>,
        value: f64,
        unit: Option<&str>,
    ) -> Result<()> {
        let name = name.into();
        let mut frame = Frame::titled(format!("Metric: {name}")).with_level(FrameLevel::Metric);
        frame.metric_name = Some(name);
        frame.metric_value = Some(value);
        frame.metric_unit = unit.map(str::to_string);
        self.capture(frame)
    }

    /// Serialize the buffer as a single JSON array.
    pub fn frames_json(&self) -> String {
        let frames = self.frames.lock().expect("lens poisoned");
        serde_json::to_string(&*frames).unwrap_or_else(|_| "[]".to_string())
    }

    /// Defensive copy of the captured frames.
    pub fn frame_array(&self) -> Vec<Frame> {
        self.frames.lock().expect("lens poisoned").clone()
    }

    pub fn clear(&self) {
        self.frames.lock().expect("lens poisoned").clear();
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().expect("lens poisoned").is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().expect("lens poisoned").len()
    }
}

/// Join an error's source chain into one string, outermost first.
fn source_chain<E: std::error::Error>(error: &E) -> Option<String> {
    let mut parts = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(": "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_rejects_blank_title() {
        let lens = Lens::new();
        assert!(matches!(
            lens.capture(Frame::titled("")),
            Err(LensError::MissingTitle)
        ));
        assert!(matches!(
            lens.capture(Frame::titled("   ")),
            Err(LensError::MissingTitle)
        ));
        assert!(lens.is_empty());
    }

    #[test]
    fn capture_assigns_timestamp_when_absent() {
        let lens = Lens::new();
        lens.capture(Frame::titled("Tick")).unwrap();
        let frames = lens.frame_array();
        assert!(frames[0].timestamp.is_some());

        let mut stamped = Frame::titled("Tock");
        stamped.timestamp = Some("2024-01-01T00:00:00Z".into());
        lens.capture(stamped).unwrap();
        assert_eq!(
            lens.frame_array()[1].timestamp.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn info_and_metric_round_trip() {
        let lens = Lens::new();
        lens.capture_info("hello", "Greeting").unwrap();
        lens.capture_metric("lat", 42.0, Some("ms")).unwrap();

        let parsed: Vec<Value> = serde_json::from_str(&lens.frames_json()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["title"], "Greeting");
        assert_eq!(parsed[0]["level"], "info");
        assert_eq!(parsed[1]["title"], "Metric: lat");
        assert_eq!(parsed[1]["metricValue"], 42.0);
        assert_eq!(parsed[1]["metricUnit"], "ms");
    }

    #[test]
    fn structured_error_records_name_and_chain() {
        #[derive(Debug, Error)]
        #[error("outer failed")]
        struct Outer {
            #[source]
            inner: std::io::Error,
        }

        let err = Outer {
            inner: std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
        };
        let lens = Lens::new();
        lens.capture_error_from(&err, "Job execution failed").unwrap();

        let frame = &lens.frame_array()[0];
        assert_eq!(frame.message.as_deref(), Some("outer failed"));
        assert!(frame.name.as_deref().unwrap().contains("Outer"));
        assert!(frame.stack.as_deref().unwrap().contains("disk on fire"));
        assert_eq!(frame.level, Some(FrameLevel::Error));
    }

    #[test]
    fn frame_array_is_a_defensive_copy() {
        let lens = Lens::new();
        lens.capture_info("a", "A").unwrap();
        let mut copy = lens.frame_array();
        copy[0].title = "mutated".into();
        copy.clear();
        assert_eq!(lens.frame_count(), 1);
        assert_eq!(lens.frame_array()[0].title, "A");
    }

    #[test]
    fn warning_alias_deserializes_to_warn() {
        let frame: Frame =
            serde_json::from_str(r#"{"title":"W","level":"warning"}"#).unwrap();
        assert_eq!(frame.level, Some(FrameLevel::Warn));
    }

    #[test]
    fn clear_empties_the_buffer() {
        let lens = Lens::new();
        lens.capture_info("a", "A").unwrap();
        lens.capture_info("b", "B").unwrap();
        assert_eq!(lens.frame_count(), 2);
        lens.clear();
        assert!(lens.is_empty());
        assert_eq!(lens.frames_json(), "[]");
    }

    #[test]
    fn extra_keys_ride_along() {
        let frame: Frame = serde_json::from_str(
            r#"{"title":"T","attempt":3,"node":"east-1"}"#,
        )
        .unwrap();
        let lens = Lens::new();
        lens.capture(frame).unwrap();
        let parsed: Vec<Value> = serde_json::from_str(&lens.frames_json()).unwrap();
        assert_eq!(parsed[0]["attempt"], 3);
        assert_eq!(parsed[0]["node"], "east-1");
    }
}
