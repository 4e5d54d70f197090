//! Face tracking event emission
//!
//! Maps tracker transitions to event payloads through a fixed catalog, and
//! suppresses repeats of the event a tracker last produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::face::trackers::{Signal, SignalChange, Transition};

/// Face tracking event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceEventType {
    FaceNotDetected,
    FaceDetected,
    MultipleFacesDetected,
    SingleFaceRestored,
    FaceAway,
    FaceReturned,
    LookingAway,
    LookingAtScreen,
    EyesClosedExtended,
    EyesOpened,
    ExcessiveBlinking,
    Squinting,
    SquintingStopped,
    HeadTilted,
    HeadPositionNormal,
    HeadMovementExcessive,
    Talking,
    StoppedTalking,
    ConfusionDetected,
    ConfusionResolved,
    LipReadingDetected,
    LipReadingStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// Whether an event marks entering or leaving a flagged state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDirection {
    Entered,
    Exited,
}

/// Static description of an event type
#[derive(Debug, Clone, Copy)]
pub struct EventDescriptor {
    pub event_type: FaceEventType,
    pub message: &'static str,
    pub severity: EventSeverity,
    pub direction: EventDirection,
}

const fn entry(
    event_type: FaceEventType,
    message: &'static str,
    severity: EventSeverity,
    direction: EventDirection,
) -> EventDescriptor {
    EventDescriptor {
        event_type,
        message,
        severity,
        direction,
    }
}

use EventDirection::{Entered, Exited};
use EventSeverity::{Critical, Info, Warning};

/// Event catalog, indexed by `FaceEventType` discriminant
static CATALOG: [EventDescriptor; FaceEventType::COUNT] = [
    entry(FaceEventType::FaceNotDetected, "No face detected in camera view", Critical, Entered),
    entry(FaceEventType::FaceDetected, "Face detected again", Info, Exited),
    entry(FaceEventType::MultipleFacesDetected, "Multiple faces detected in camera view", Critical, Entered),
    entry(FaceEventType::SingleFaceRestored, "Only one face in camera view again", Info, Exited),
    entry(FaceEventType::FaceAway, "Head turned away from the screen", Warning, Entered),
    entry(FaceEventType::FaceReturned, "Head turned back to the screen", Info, Exited),
    entry(FaceEventType::LookingAway, "Looking away from the screen", Warning, Entered),
    entry(FaceEventType::LookingAtScreen, "Looking at the screen again", Info, Exited),
    entry(FaceEventType::EyesClosedExtended, "Eyes closed for an extended period", Warning, Entered),
    entry(FaceEventType::EyesOpened, "Eyes opened", Info, Exited),
    entry(FaceEventType::ExcessiveBlinking, "Unusually frequent blinking", Warning, Entered),
    entry(FaceEventType::Squinting, "Squinting detected", Info, Entered),
    entry(FaceEventType::SquintingStopped, "Squinting stopped", Info, Exited),
    entry(FaceEventType::HeadTilted, "Head tilted", Info, Entered),
    entry(FaceEventType::HeadPositionNormal, "Head position back to normal", Info, Exited),
    entry(FaceEventType::HeadMovementExcessive, "Frequent head movement", Warning, Entered),
    entry(FaceEventType::Talking, "Talking detected", Warning, Entered),
    entry(FaceEventType::StoppedTalking, "Stopped talking", Info, Exited),
    entry(FaceEventType::ConfusionDetected, "Confused expression detected", Info, Entered),
    entry(FaceEventType::ConfusionResolved, "Confused expression resolved", Info, Exited),
    entry(FaceEventType::LipReadingDetected, "Lips moving without speaking", Warning, Entered),
    entry(FaceEventType::LipReadingStopped, "Lip movement stopped", Info, Exited),
];

impl FaceEventType {
    pub const COUNT: usize = 22;

    pub fn descriptor(self) -> &'static EventDescriptor {
        &CATALOG[self as usize]
    }

    pub fn message(self) -> &'static str {
        self.descriptor().message
    }

    pub fn severity(self) -> EventSeverity {
        self.descriptor().severity
    }

    pub fn direction(self) -> EventDirection {
        self.descriptor().direction
    }

    /// Event for a signal transition; `None` for rate trackers leaving their state
    pub fn for_change(signal: Signal, transition: Transition) -> Option<Self> {
        use FaceEventType::*;
        let (entered, exited) = match signal {
            Signal::Presence => (FaceNotDetected, Some(FaceDetected)),
            Signal::FaceCount => (MultipleFacesDetected, Some(SingleFaceRestored)),
            Signal::HeadTurn => (FaceAway, Some(FaceReturned)),
            Signal::Gaze => (LookingAway, Some(LookingAtScreen)),
            Signal::EyeClosure => (EyesClosedExtended, Some(EyesOpened)),
            Signal::BlinkRate => (ExcessiveBlinking, None),
            Signal::Squint => (Squinting, Some(SquintingStopped)),
            Signal::HeadTilt => (HeadTilted, Some(HeadPositionNormal)),
            Signal::HeadMovement => (HeadMovementExcessive, None),
            Signal::Talking => (Talking, Some(StoppedTalking)),
            Signal::Confusion => (ConfusionDetected, Some(ConfusionResolved)),
            Signal::LipReading => (LipReadingDetected, Some(LipReadingStopped)),
        };
        match transition {
            Transition::Entered => Some(entered),
            Transition::Exited => exited,
            Transition::Rearmed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        use FaceEventType::*;
        match self {
            FaceNotDetected => "face_not_detected",
            FaceDetected => "face_detected",
            MultipleFacesDetected => "multiple_faces_detected",
            SingleFaceRestored => "single_face_restored",
            FaceAway => "face_away",
            FaceReturned => "face_returned",
            LookingAway => "looking_away",
            LookingAtScreen => "looking_at_screen",
            EyesClosedExtended => "eyes_closed_extended",
            EyesOpened => "eyes_opened",
            ExcessiveBlinking => "excessive_blinking",
            Squinting => "squinting",
            SquintingStopped => "squinting_stopped",
            HeadTilted => "head_tilted",
            HeadPositionNormal => "head_position_normal",
            HeadMovementExcessive => "head_movement_excessive",
            Talking => "talking",
            StoppedTalking => "stopped_talking",
            ConfusionDetected => "confusion_detected",
            ConfusionResolved => "confusion_resolved",
            LipReadingDetected => "lip_reading_detected",
            LipReadingStopped => "lip_reading_stopped",
        }
    }
}

/// One emitted face tracking event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceTrackingEventPayload {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: FaceEventType,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: EventSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Edge-triggered event emitter for one session
#[derive(Debug, Clone)]
pub struct EventEmitter {
    session_id: String,
    last_emitted: [Option<FaceEventType>; Signal::COUNT],
}

impl EventEmitter {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            last_emitted: [None; Signal::COUNT],
        }
    }

    /// Turn the frame's changes into payloads, in the order given
    pub fn emit(
        &mut self,
        changes: Vec<SignalChange>,
        captured_at: DateTime<Utc>,
    ) -> Vec<FaceTrackingEventPayload> {
        let mut events = Vec::with_capacity(changes.len());

        for change in changes {
            let slot = &mut self.last_emitted[change.signal.index()];
            let Some(event_type) = FaceEventType::for_change(change.signal, change.transition)
            else {
                // Silent re-arm: the next excursion may fire again
                *slot = None;
                continue;
            };
            if *slot == Some(event_type) {
                continue;
            }
            *slot = Some(event_type);

            debug!(
                session_id = %self.session_id,
                event_type = event_type.as_str(),
                "face tracking event"
            );
            events.push(FaceTrackingEventPayload {
                id: event_id(&self.session_id, event_type, captured_at),
                event_type,
                timestamp: captured_at,
                message: event_type.message().to_string(),
                severity: event_type.severity(),
                details: change.details,
                data: change.data,
            });
        }

        events
    }
}

/// Deterministic event id: identical input replays produce identical ids
fn event_id(session_id: &str, event_type: FaceEventType, captured_at: DateTime<Utc>) -> Uuid {
    let name = format!(
        "{}/{}/{}",
        session_id,
        event_type.as_str(),
        captured_at.timestamp_millis()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(signal: Signal, transition: Transition) -> SignalChange {
        SignalChange {
            signal,
            transition,
            details: None,
            data: None,
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_catalog_is_indexed_by_type() {
        for (i, descriptor) in CATALOG.iter().enumerate() {
            assert_eq!(descriptor.event_type as usize, i);
            assert!(!descriptor.message.is_empty());
        }
    }

    #[test]
    fn test_every_signal_maps_to_catalog_directions() {
        for signal in Signal::ALL {
            let entered = FaceEventType::for_change(signal, Transition::Entered).unwrap();
            assert_eq!(entered.direction(), EventDirection::Entered);
            if let Some(exited) = FaceEventType::for_change(signal, Transition::Exited) {
                assert_eq!(exited.direction(), EventDirection::Exited);
            }
            assert_eq!(FaceEventType::for_change(signal, Transition::Rearmed), None);
        }
    }

    #[test]
    fn test_serialized_name_matches_as_str() {
        let json = serde_json::to_string(&FaceEventType::MultipleFacesDetected).unwrap();
        assert_eq!(json, "\"multiple_faces_detected\"");
        assert_eq!(
            FaceEventType::LipReadingStopped.as_str(),
            "lip_reading_stopped"
        );
    }

    #[test]
    fn test_repeated_entry_is_suppressed() {
        let mut emitter = EventEmitter::new("sess");
        let first = emitter.emit(vec![change(Signal::Gaze, Transition::Entered)], at(0));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event_type, FaceEventType::LookingAway);

        let again = emitter.emit(vec![change(Signal::Gaze, Transition::Entered)], at(10));
        assert!(again.is_empty());

        let exit = emitter.emit(vec![change(Signal::Gaze, Transition::Exited)], at(20));
        assert_eq!(exit[0].event_type, FaceEventType::LookingAtScreen);
    }

    #[test]
    fn test_rearm_allows_rate_event_again() {
        let mut emitter = EventEmitter::new("sess");
        assert_eq!(
            emitter
                .emit(vec![change(Signal::BlinkRate, Transition::Entered)], at(0))
                .len(),
            1
        );
        assert!(emitter
            .emit(vec![change(Signal::BlinkRate, Transition::Rearmed)], at(5))
            .is_empty());
        assert_eq!(
            emitter
                .emit(vec![change(Signal::BlinkRate, Transition::Entered)], at(9))
                .len(),
            1
        );
    }

    #[test]
    fn test_payload_fields() {
        let mut emitter = EventEmitter::new("sess");
        let events = emitter.emit(
            vec![change(Signal::FaceCount, Transition::Entered)],
            at(1_700_000_000_000),
        );
        let event = &events[0];
        assert_eq!(event.severity, EventSeverity::Critical);
        assert_eq!(event.timestamp, at(1_700_000_000_000));
        assert_eq!(event.message, "Multiple faces detected in camera view");
        assert_eq!(
            event.id,
            event_id("sess", FaceEventType::MultipleFacesDetected, at(1_700_000_000_000))
        );

        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "multiple_faces_detected");
        assert!(json.get("details").is_none());
    }
}
