//! Turns hub events into relay actions, honouring the local snooze window.
//!
//! Only a press is snooze-gated; a release always switches the relay off so
//! a bell can never be left ringing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::devices::{DeviceError, Relay};
use crate::models::chime::is_snoozed;
use crate::models::event::{
    parse_envelope, ButtonEvent, ButtonEventType, EventError, EventKind, SnoozeEvent,
    StopProcessingEvent, UnSnoozeEvent,
};

/// What handling one frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    RelayOn,
    RelayOff,
    /// Press ignored because of an active snooze.
    Suppressed { until: DateTime<Utc> },
    SnoozeSet { until: DateTime<Utc> },
    SnoozeCleared,
    /// Frame logged and skipped (unknown type, bad payload, internal event).
    Skipped,
}

/// Per-connection dispatcher. Created fresh on every connection, so the
/// snooze mirror starts at "never".
pub struct Dispatcher {
    relay: Arc<dyn Relay>,
    snooze_until: Option<DateTime<Utc>>,
}

impl Dispatcher {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self {
            relay,
            snooze_until: None,
        }
    }

    pub fn snooze_until(&self) -> Option<DateTime<Utc>> {
        self.snooze_until
    }

    /// Decode one text frame and act on it. Decode problems are logged and
    /// skipped; only relay failures are returned.
    pub fn handle_frame(&mut self, text: &str, now: DateTime<Utc>) -> Result<Outcome, DeviceError> {
        match self.decode_and_apply(text.as_bytes(), now) {
            Ok(outcome) => outcome,
            Err(EventError::UnknownEventType(event_type)) => {
                warn!(event_type = %event_type, "unhandled event type");
                Ok(Outcome::Skipped)
            }
            Err(e) => {
                error!(error = %e, payload = %text, "failed to parse event");
                Ok(Outcome::Skipped)
            }
        }
    }

    fn decode_and_apply(
        &mut self,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Result<Outcome, DeviceError>, EventError> {
        let raw = parse_envelope(bytes)?;
        let outcome = match raw.kind()? {
            EventKind::Button => self.on_button(raw.parse_as::<ButtonEvent>()?, now),
            EventKind::Snooze => Ok(self.on_snooze(raw.parse_as::<SnoozeEvent>()?)),
            EventKind::UnSnooze => Ok(self.on_unsnooze(raw.parse_as::<UnSnoozeEvent>()?)),
            EventKind::StopProcessing => {
                let event = raw.parse_as::<StopProcessingEvent>()?;
                debug!(id = %event.id, "ignoring internal stop-processing event");
                Ok(Outcome::Skipped)
            }
        };
        Ok(outcome)
    }

    fn on_button(&mut self, event: ButtonEvent, now: DateTime<Utc>) -> Result<Outcome, DeviceError> {
        info!(
            id = %event.id,
            button = event.button_event_type.as_str(),
            source = %event.source,
            "button event"
        );
        match event.button_event_type {
            ButtonEventType::Pressed => {
                if let Some(until) = self.snooze_until.filter(|u| is_snoozed(Some(*u), now)) {
                    info!(until = %until.to_rfc3339(), "snoozed, not turning relay on");
                    return Ok(Outcome::Suppressed { until });
                }
                info!("turning relay on");
                self.relay.on()?;
                Ok(Outcome::RelayOn)
            }
            ButtonEventType::Released => {
                info!("turning relay off");
                self.relay.off()?;
                Ok(Outcome::RelayOff)
            }
        }
    }

    fn on_snooze(&mut self, event: SnoozeEvent) -> Outcome {
        info!(id = %event.id, until = %event.snooze_expiry.to_rfc3339(), "setting snooze");
        self.snooze_until = Some(event.snooze_expiry);
        Outcome::SnoozeSet {
            until: event.snooze_expiry,
        }
    }

    fn on_unsnooze(&mut self, event: UnSnoozeEvent) -> Outcome {
        info!(id = %event.id, "canceling snooze");
        self.snooze_until = None;
        Outcome::SnoozeCleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::testing::RecordingRelay;
    use crate::models::event::Event;
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    fn frame(event: Event) -> String {
        event.to_json().unwrap()
    }

    fn setup() -> (Arc<RecordingRelay>, Dispatcher) {
        let relay = Arc::new(RecordingRelay::default());
        let dispatcher = Dispatcher::new(relay.clone());
        (relay, dispatcher)
    }

    #[test]
    fn press_and_release_drive_relay() {
        let (relay, mut dispatcher) = setup();
        let now = Utc::now();
        let pressed = frame(Event::button(ButtonEventType::Pressed, "web"));
        let released = frame(Event::button(ButtonEventType::Released, "web"));
        assert_eq!(dispatcher.handle_frame(&pressed, now).unwrap(), Outcome::RelayOn);
        assert_eq!(dispatcher.handle_frame(&released, now).unwrap(), Outcome::RelayOff);
        assert_eq!(relay.calls(), vec![true, false]);
    }

    #[test]
    fn snooze_gates_press_but_not_release() {
        let (relay, mut dispatcher) = setup();
        let now = Utc::now();
        let until = now + Duration::minutes(5);

        assert_eq!(
            dispatcher.handle_frame(&frame(Event::snooze(until)), now).unwrap(),
            Outcome::SnoozeSet { until }
        );
        assert_eq!(
            dispatcher
                .handle_frame(&frame(Event::button(ButtonEventType::Pressed, "web")), now)
                .unwrap(),
            Outcome::Suppressed { until }
        );
        assert_eq!(
            dispatcher
                .handle_frame(&frame(Event::button(ButtonEventType::Released, "web")), now)
                .unwrap(),
            Outcome::RelayOff
        );
        assert_eq!(relay.calls(), vec![false]);
    }

    #[test]
    fn snooze_expires_and_unsnooze_clears() {
        let (relay, mut dispatcher) = setup();
        let now = Utc::now();
        let until = now + Duration::minutes(5);
        let pressed = frame(Event::button(ButtonEventType::Pressed, "web"));

        dispatcher.handle_frame(&frame(Event::snooze(until)), now).unwrap();
        assert_eq!(
            dispatcher.handle_frame(&pressed, until).unwrap(),
            Outcome::RelayOn,
            "press at the expiry instant rings"
        );

        dispatcher.handle_frame(&frame(Event::snooze(until)), now).unwrap();
        assert_eq!(
            dispatcher.handle_frame(&frame(Event::unsnooze()), now).unwrap(),
            Outcome::SnoozeCleared
        );
        assert_eq!(dispatcher.snooze_until(), None);
        assert_eq!(dispatcher.handle_frame(&pressed, now).unwrap(), Outcome::RelayOn);
        assert_eq!(relay.calls(), vec![true, true]);
    }

    #[test]
    fn bad_frames_are_skipped() {
        let (relay, mut dispatcher) = setup();
        let now = Utc::now();
        for text in [
            "not json",
            r#"{"eventType":"confetti-event","id":"x"}"#,
            r#"{"eventType":"button-event","id":"x"}"#,
        ] {
            assert_eq!(dispatcher.handle_frame(text, now).unwrap(), Outcome::Skipped);
        }
        assert_eq!(
            dispatcher
                .handle_frame(&frame(Event::stop_processing()), now)
                .unwrap(),
            Outcome::Skipped
        );
        assert!(relay.calls().is_empty());
    }

    #[test]
    fn relay_failure_is_returned() {
        let (relay, mut dispatcher) = setup();
        relay.fail.store(true, Ordering::SeqCst);
        let pressed = frame(Event::button(ButtonEventType::Pressed, "web"));
        assert!(dispatcher.handle_frame(&pressed, Utc::now()).is_err());
    }
}
