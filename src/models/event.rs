//! Doorbell events: wire envelope, variants, and decoding.
//!
//! Every event travels as a JSON object whose `eventType` field names the
//! variant. Decoding happens in two steps so a reader can skip variants it
//! does not know: [`parse_envelope`] peeks at the discriminator, then
//! [`RawEvent::parse_as`] decodes the variant body.

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

pub const EVENT_TYPE_BUTTON: &str = "button-event";
pub const EVENT_TYPE_SNOOZE: &str = "snooze-event";
pub const EVENT_TYPE_UNSNOOZE: &str = "unsnooze-event";
pub const EVENT_TYPE_STOP_PROCESSING: &str = "stop-processing-event";

/// Decode failures. None of these are fatal to a reader.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("payload does not match {expected}: {reason}")]
    SchemaMismatch {
        expected: &'static str,
        reason: String,
    },

    #[error("unknown event type: {0:?}")]
    UnknownEventType(String),
}

/// Discriminator of every known variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Button,
    Snooze,
    UnSnooze,
    StopProcessing,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Button => EVENT_TYPE_BUTTON,
            EventKind::Snooze => EVENT_TYPE_SNOOZE,
            EventKind::UnSnooze => EVENT_TYPE_UNSNOOZE,
            EventKind::StopProcessing => EVENT_TYPE_STOP_PROCESSING,
        }
    }

    pub fn from_wire(event_type: &str) -> Option<Self> {
        match event_type {
            EVENT_TYPE_BUTTON => Some(EventKind::Button),
            EVENT_TYPE_SNOOZE => Some(EventKind::Snooze),
            EVENT_TYPE_UNSNOOZE => Some(EventKind::UnSnooze),
            EVENT_TYPE_STOP_PROCESSING => Some(EventKind::StopProcessing),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pressed or released. Encoded on the wire as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEventType {
    Pressed,
    Released,
}

impl ButtonEventType {
    fn code(self) -> u8 {
        match self {
            ButtonEventType::Pressed => 0,
            ButtonEventType::Released => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ButtonEventType::Pressed => "pressed",
            ButtonEventType::Released => "released",
        }
    }
}

impl Serialize for ButtonEventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for ButtonEventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(ButtonEventType::Pressed),
            1 => Ok(ButtonEventType::Released),
            other => Err(de::Error::custom(format!(
                "invalid buttonEventType {other}, expected 0 (pressed) or 1 (released)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonEvent {
    pub id: Uuid,
    pub button_event_type: ButtonEventType,
    pub source: String,
}

impl ButtonEvent {
    pub fn new(button_event_type: ButtonEventType, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            button_event_type,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozeEvent {
    pub id: Uuid,
    pub snooze_expiry: DateTime<Utc>,
}

impl SnoozeEvent {
    pub fn new(snooze_expiry: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            snooze_expiry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnSnoozeEvent {
    pub id: Uuid,
}

impl UnSnoozeEvent {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for UnSnoozeEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Retires a superseded connection handler. Never written to a socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopProcessingEvent {
    pub id: Uuid,
}

impl StopProcessingEvent {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for StopProcessingEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// A variant body that can be decoded on its own.
pub trait WireEvent: DeserializeOwned {
    const KIND: EventKind;
}

impl WireEvent for ButtonEvent {
    const KIND: EventKind = EventKind::Button;
}

impl WireEvent for SnoozeEvent {
    const KIND: EventKind = EventKind::Snooze;
}

impl WireEvent for UnSnoozeEvent {
    const KIND: EventKind = EventKind::UnSnooze;
}

impl WireEvent for StopProcessingEvent {
    const KIND: EventKind = EventKind::StopProcessing;
}

/// Every event the hub can emit. The serde tag keeps the discriminator and
/// the variant in lockstep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum Event {
    #[serde(rename = "button-event")]
    Button(ButtonEvent),
    #[serde(rename = "snooze-event")]
    Snooze(SnoozeEvent),
    #[serde(rename = "unsnooze-event")]
    UnSnooze(UnSnoozeEvent),
    #[serde(rename = "stop-processing-event")]
    StopProcessing(StopProcessingEvent),
}

impl Event {
    pub fn button(button_event_type: ButtonEventType, source: impl Into<String>) -> Self {
        Event::Button(ButtonEvent::new(button_event_type, source))
    }

    pub fn snooze(until: DateTime<Utc>) -> Self {
        Event::Snooze(SnoozeEvent::new(until))
    }

    pub fn unsnooze() -> Self {
        Event::UnSnooze(UnSnoozeEvent::new())
    }

    pub fn stop_processing() -> Self {
        Event::StopProcessing(StopProcessingEvent::new())
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Button(_) => EventKind::Button,
            Event::Snooze(_) => EventKind::Snooze,
            Event::UnSnooze(_) => EventKind::UnSnooze,
            Event::StopProcessing(_) => EventKind::StopProcessing,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Event::Button(e) => e.id,
            Event::Snooze(e) => e.id,
            Event::UnSnooze(e) => e.id,
            Event::StopProcessing(e) => e.id,
        }
    }

    /// Serialize to the wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a full event, rejecting unknown discriminators.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EventError> {
        let raw = parse_envelope(bytes)?;
        match raw.kind()? {
            EventKind::Button => raw.parse_as::<ButtonEvent>().map(Event::Button),
            EventKind::Snooze => raw.parse_as::<SnoozeEvent>().map(Event::Snooze),
            EventKind::UnSnooze => raw.parse_as::<UnSnoozeEvent>().map(Event::UnSnooze),
            EventKind::StopProcessing => raw
                .parse_as::<StopProcessingEvent>()
                .map(Event::StopProcessing),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "eventType")]
    event_type: String,
}

/// An event whose discriminator is known but whose body is not yet decoded.
#[derive(Debug, Clone)]
pub struct RawEvent<'a> {
    pub event_type: String,
    pub raw: &'a [u8],
}

impl<'a> RawEvent<'a> {
    pub fn kind(&self) -> Result<EventKind, EventError> {
        EventKind::from_wire(&self.event_type)
            .ok_or_else(|| EventError::UnknownEventType(self.event_type.clone()))
    }

    /// Decode the body as `T`. The envelope discriminator must name `T`.
    pub fn parse_as<T: WireEvent>(&self) -> Result<T, EventError> {
        if self.event_type != T::KIND.as_str() {
            return Err(EventError::SchemaMismatch {
                expected: T::KIND.as_str(),
                reason: format!("eventType is {:?}", self.event_type),
            });
        }
        serde_json::from_slice(self.raw).map_err(|e| EventError::SchemaMismatch {
            expected: T::KIND.as_str(),
            reason: e.to_string(),
        })
    }
}

/// Read the `eventType` discriminator without decoding the body.
pub fn parse_envelope(bytes: &[u8]) -> Result<RawEvent<'_>, EventError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(EventError::MalformedPayload)?;
    let envelope: Envelope =
        serde_json::from_value(value).map_err(|e| EventError::SchemaMismatch {
            expected: "event envelope",
            reason: e.to_string(),
        })?;
    Ok(RawEvent {
        event_type: envelope.event_type,
        raw: bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn button_event_wire_shape() {
        let event = Event::button(ButtonEventType::Pressed, "web");
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["eventType"], "button-event");
        assert_eq!(json["buttonEventType"], 0);
        assert_eq!(json["source"], "web");
        assert_eq!(json["id"], event.id().to_string());
    }

    #[test]
    fn snooze_expiry_is_rfc3339() {
        let until = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&Event::snooze(until).to_json().unwrap()).unwrap();
        assert_eq!(json["eventType"], "snooze-event");
        assert_eq!(json["snoozeExpiry"], "2024-05-01T12:30:00Z");
    }

    #[test]
    fn variants_survive_the_wire() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        let far_future = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        let events = vec![
            Event::button(ButtonEventType::Pressed, "bellpush"),
            Event::button(ButtonEventType::Released, "keyboard"),
            Event::snooze(epoch),
            Event::snooze(far_future),
            Event::unsnooze(),
            Event::stop_processing(),
        ];
        for event in events {
            let json = event.to_json().unwrap();
            assert_eq!(Event::from_json(json.as_bytes()).unwrap(), event);
        }
    }

    #[test]
    fn parse_as_single_variant() {
        let until = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let event = SnoozeEvent::new(until);
        let json = Event::Snooze(event.clone()).to_json().unwrap();
        let raw = parse_envelope(json.as_bytes()).unwrap();
        assert_eq!(raw.kind().unwrap(), EventKind::Snooze);
        assert_eq!(raw.parse_as::<SnoozeEvent>().unwrap(), event);
    }

    #[test]
    fn parse_as_wrong_variant_is_schema_mismatch() {
        let json = Event::unsnooze().to_json().unwrap();
        let raw = parse_envelope(json.as_bytes()).unwrap();
        assert!(matches!(
            raw.parse_as::<ButtonEvent>(),
            Err(EventError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            parse_envelope(b"{not json"),
            Err(EventError::MalformedPayload(_))
        ));
    }

    #[test]
    fn missing_fields_are_schema_mismatch() {
        let raw = parse_envelope(br#"{"eventType":"snooze-event","id":"not-a-uuid"}"#).unwrap();
        assert!(matches!(
            raw.parse_as::<SnoozeEvent>(),
            Err(EventError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            parse_envelope(br#"{"id":"x"}"#),
            Err(EventError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn unknown_button_code_is_rejected() {
        let body = format!(
            r#"{{"eventType":"button-event","id":"{}","buttonEventType":7,"source":"web"}}"#,
            Uuid::new_v4()
        );
        assert!(matches!(
            Event::from_json(body.as_bytes()),
            Err(EventError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn unknown_discriminator_is_reported() {
        let err = Event::from_json(br#"{"eventType":"doorbell-melted","id":"x"}"#).unwrap_err();
        match err {
            EventError::UnknownEventType(t) => assert_eq!(t, "doorbell-melted"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
