//! Signaling router: picks destinations for each inbound event.
//!
//! Topology is fixed: one privileged peer (pose analysis) and any number of
//! ordinary peers (browsers). Payloads are forwarded unchanged, except that
//! an explicit `"data": null` goes out with `data` omitted. Answers,
//! privileged ICE candidates, and feedback are broadcast to every other
//! connection rather than addressed to a session partner, so two browsers
//! streaming at once would see each other's signaling.

use super::coordinator::ClaimOutcome;
use super::outbox::{broadcast, Outbox};
use super::registry::{ConnectionId, PeerPatch, PeerRole};
use super::state::RelayState;
use chrono::Utc;
use fitrelay_core::{events, Envelope, InboundKind, PongPayload};
use tracing::{debug, warn};

/// What the router did with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// `connect-python` handled by the coordinator.
    Claim(ClaimOutcome),
    /// Forwarded to `delivered` connections (possibly zero).
    Forwarded { delivered: usize },
    /// No privileged peer; the sender was told it is unavailable.
    NoRoute,
    /// No privileged peer; dropped without notice.
    Dropped,
    /// Answered directly to the sender.
    Replied,
    /// Event name not recognised.
    UnknownEvent,
}

/// Handler signature shared by every entry of the dispatch table.
pub type Handler = fn(&mut RelayState, &mut dyn Outbox, ConnectionId, Envelope) -> RouteOutcome;

/// Dispatch table: event kind to handler.
pub fn handler_for(kind: InboundKind) -> Handler {
    match kind {
        InboundKind::ClaimPrivileged => on_claim,
        InboundKind::Offer => on_offer,
        InboundKind::Answer => on_answer,
        InboundKind::IceCandidate => on_ice_candidate,
        InboundKind::ExerciseChange => on_exercise_change,
        InboundKind::Feedback => on_feedback,
        InboundKind::Ping => on_ping,
    }
}

/// Route one inbound envelope from `from`.
pub fn route(
    state: &mut RelayState,
    outbox: &mut dyn Outbox,
    from: ConnectionId,
    envelope: Envelope,
) -> RouteOutcome {
    match InboundKind::from_event(&envelope.event) {
        Some(kind) => handler_for(kind)(state, outbox, from, envelope),
        None => {
            debug!(conn_id = from, event = %envelope.event, "ignoring unknown event");
            RouteOutcome::UnknownEvent
        }
    }
}

fn on_claim(
    state: &mut RelayState,
    _outbox: &mut dyn Outbox,
    from: ConnectionId,
    envelope: Envelope,
) -> RouteOutcome {
    let outcome = state
        .coordinator
        .claim_privileged(&mut state.registry, from, &envelope.data);
    RouteOutcome::Claim(outcome)
}

fn on_offer(
    state: &mut RelayState,
    outbox: &mut dyn Outbox,
    from: ConnectionId,
    envelope: Envelope,
) -> RouteOutcome {
    let Some(target) = state.coordinator.current_privileged() else {
        warn!(conn_id = from, "offer received but pose-analysis peer is not connected");
        notify_unavailable(outbox, from);
        return RouteOutcome::NoRoute;
    };

    debug!(
        conn_id = from,
        target,
        exercise = envelope.exercise_type().unwrap_or("-"),
        "forwarding offer"
    );
    let delivered = usize::from(outbox.deliver(target, &envelope));
    annotate_sender(state, from, &envelope);
    RouteOutcome::Forwarded { delivered }
}

fn on_answer(
    state: &mut RelayState,
    outbox: &mut dyn Outbox,
    from: ConnectionId,
    envelope: Envelope,
) -> RouteOutcome {
    if !state.coordinator.is_privileged(from) {
        debug!(conn_id = from, "answer from non-privileged peer, broadcasting anyway");
    }
    let delivered = broadcast(outbox, state.registry.ids_except(from), &envelope);
    debug!(conn_id = from, delivered, "forwarded answer");
    RouteOutcome::Forwarded { delivered }
}

fn on_ice_candidate(
    state: &mut RelayState,
    outbox: &mut dyn Outbox,
    from: ConnectionId,
    envelope: Envelope,
) -> RouteOutcome {
    match state.coordinator.current_privileged() {
        Some(privileged) if privileged == from => {
            let delivered = broadcast(outbox, state.registry.ids_except(from), &envelope);
            RouteOutcome::Forwarded { delivered }
        }
        Some(privileged) => {
            let delivered = usize::from(outbox.deliver(privileged, &envelope));
            RouteOutcome::Forwarded { delivered }
        }
        None => {
            warn!(conn_id = from, "ICE candidate received but pose-analysis peer is not connected");
            notify_unavailable(outbox, from);
            RouteOutcome::NoRoute
        }
    }
}

fn on_exercise_change(
    state: &mut RelayState,
    outbox: &mut dyn Outbox,
    from: ConnectionId,
    envelope: Envelope,
) -> RouteOutcome {
    let Some(target) = state.coordinator.current_privileged() else {
        return RouteOutcome::Dropped;
    };

    let delivered = usize::from(outbox.deliver(target, &envelope));
    annotate_sender(state, from, &envelope);
    RouteOutcome::Forwarded { delivered }
}

fn on_feedback(
    state: &mut RelayState,
    outbox: &mut dyn Outbox,
    from: ConnectionId,
    envelope: Envelope,
) -> RouteOutcome {
    let delivered = broadcast(outbox, state.registry.ids_except(from), &envelope);
    RouteOutcome::Forwarded { delivered }
}

fn on_ping(
    state: &mut RelayState,
    outbox: &mut dyn Outbox,
    from: ConnectionId,
    _envelope: Envelope,
) -> RouteOutcome {
    let pong = PongPayload {
        python_connected: state.coordinator.current_privileged().is_some(),
        timestamp: Utc::now().timestamp_millis(),
    };
    outbox.deliver(from, &pong.into_envelope());
    RouteOutcome::Replied
}

fn notify_unavailable(outbox: &mut dyn Outbox, to: ConnectionId) {
    outbox.deliver(to, &Envelope::bare(events::PYTHON_DISCONNECTED));
}

/// Record the sender's exercise and mark it ordinary unless it is privileged.
fn annotate_sender(state: &mut RelayState, from: ConnectionId, envelope: &Envelope) {
    let role = (!state.coordinator.is_privileged(from)).then_some(PeerRole::Ordinary);
    let patch = PeerPatch {
        role,
        exercise_type: None,
    }
    .with_exercise(envelope.exercise_type());
    state.registry.set_metadata(from, patch);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::outbox::RecordingOutbox;
    use crate::relay::policy::OpenClaim;
    use serde_json::{json, Value};

    const P: ConnectionId = 1;
    const C1: ConnectionId = 2;
    const C2: ConnectionId = 3;

    fn relay(ids: &[ConnectionId]) -> (RelayState, RecordingOutbox) {
        let mut state = RelayState::new(Box::new(OpenClaim));
        for id in ids {
            state.connect(*id);
        }
        (state, RecordingOutbox::default())
    }

    fn send(
        state: &mut RelayState,
        outbox: &mut RecordingOutbox,
        from: ConnectionId,
        event: &str,
        data: Value,
    ) -> RouteOutcome {
        route(state, outbox, from, Envelope::new(event, data))
    }

    #[test]
    fn offer_reaches_privileged_peer_verbatim() {
        let (mut state, mut outbox) = relay(&[P, C1]);
        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);

        let offer = json!({ "sdp": "v=0\r\n", "type": "offer", "exerciseType": "pushup" });
        let outcome = send(&mut state, &mut outbox, C1, events::WEBRTC_OFFER, offer.clone());

        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 1 });
        assert_eq!(outbox.sent, vec![(P, Envelope::new(events::WEBRTC_OFFER, offer))]);

        let sender = state.registry.get(C1).unwrap();
        assert_eq!(sender.role, PeerRole::Ordinary);
        assert_eq!(sender.exercise_type.as_deref(), Some("pushup"));
    }

    #[test]
    fn offer_without_privileged_peer_notifies_sender_only() {
        let (mut state, mut outbox) = relay(&[C1, C2]);
        let outcome = send(
            &mut state,
            &mut outbox,
            C1,
            events::WEBRTC_OFFER,
            json!({ "exerciseType": "squat" }),
        );

        assert_eq!(outcome, RouteOutcome::NoRoute);
        assert_eq!(outbox.sent, vec![(C1, Envelope::bare(events::PYTHON_DISCONNECTED))]);
        assert_eq!(state.registry.get(C1).unwrap().role, PeerRole::Unknown);
    }

    #[test]
    fn answer_broadcasts_to_everyone_else() {
        let (mut state, mut outbox) = relay(&[P, C1, C2]);
        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);

        let answer = json!({ "sdp": "v=0\r\n", "type": "answer" });
        let outcome = send(&mut state, &mut outbox, P, events::WEBRTC_ANSWER, answer);
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 2 });
        assert!(outbox.to(P).is_empty());
        assert_eq!(outbox.to(C1).len(), 1);
        assert_eq!(outbox.to(C2).len(), 1);
    }

    #[test]
    fn answer_from_ordinary_peer_still_broadcasts() {
        let (mut state, mut outbox) = relay(&[C1, C2]);
        let outcome = send(&mut state, &mut outbox, C1, events::WEBRTC_ANSWER, json!({}));
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 1 });
        assert_eq!(outbox.to(C2)[0].event, events::WEBRTC_ANSWER);
    }

    #[test]
    fn ice_from_privileged_broadcasts() {
        let (mut state, mut outbox) = relay(&[P, C1, C2]);
        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);

        let candidate = json!({ "candidate": "candidate:0 1 UDP 2122252543 192.168.1.4 50000 typ host" });
        let outcome = send(&mut state, &mut outbox, P, events::ICE_CANDIDATE, candidate.clone());
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 2 });
        for id in [C1, C2] {
            assert_eq!(outbox.to(id), vec![&Envelope::new(events::ICE_CANDIDATE, candidate.clone())]);
        }
    }

    #[test]
    fn ice_from_lone_privileged_sends_nothing() {
        let (mut state, mut outbox) = relay(&[P]);
        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);
        let outcome = send(&mut state, &mut outbox, P, events::ICE_CANDIDATE, json!({}));
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 0 });
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn ice_from_ordinary_goes_to_privileged_only() {
        let (mut state, mut outbox) = relay(&[P, C1, C2]);
        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);
        let outcome = send(&mut state, &mut outbox, C1, events::ICE_CANDIDATE, json!({ "candidate": "" }));
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 1 });
        assert_eq!(outbox.sent.len(), 1);
        assert_eq!(outbox.sent[0].0, P);
    }

    #[test]
    fn ice_without_privileged_notifies_sender() {
        let (mut state, mut outbox) = relay(&[C1]);
        let outcome = send(&mut state, &mut outbox, C1, events::ICE_CANDIDATE, json!({}));
        assert_eq!(outcome, RouteOutcome::NoRoute);
        assert_eq!(outbox.to(C1)[0].event, events::PYTHON_DISCONNECTED);
    }

    #[test]
    fn exercise_change_forwards_and_updates_metadata() {
        let (mut state, mut outbox) = relay(&[P, C1]);
        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);
        send(&mut state, &mut outbox, C1, events::WEBRTC_OFFER, json!({ "exerciseType": "pushup" }));
        outbox.clear();

        let outcome = send(
            &mut state,
            &mut outbox,
            C1,
            events::EXERCISE_CHANGE,
            json!({ "exerciseType": "bicepcurl" }),
        );
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 1 });
        assert_eq!(outbox.to(P)[0].data["exerciseType"], json!("bicepcurl"));
        assert_eq!(state.registry.get(C1).unwrap().exercise_type.as_deref(), Some("bicepcurl"));
    }

    #[test]
    fn exercise_change_without_privileged_is_silent() {
        let (mut state, mut outbox) = relay(&[C1]);
        let outcome = send(
            &mut state,
            &mut outbox,
            C1,
            events::EXERCISE_CHANGE,
            json!({ "exerciseType": "crunches" }),
        );
        assert_eq!(outcome, RouteOutcome::Dropped);
        assert!(outbox.sent.is_empty());
        assert_eq!(state.registry.get(C1).unwrap().exercise_type, None);
    }

    #[test]
    fn feedback_skips_sender() {
        let (mut state, mut outbox) = relay(&[P, C1, C2]);
        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);

        let feedback = json!({ "feedback": { "form": "ok", "accuracy": 90 }, "repCount": 5 });
        let outcome = send(&mut state, &mut outbox, P, events::EXERCISE_FEEDBACK, feedback.clone());
        assert_eq!(outcome, RouteOutcome::Forwarded { delivered: 2 });
        assert!(outbox.to(P).is_empty());
        for id in [C1, C2] {
            let got = outbox.to(id);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0].data, feedback);
        }
    }

    #[test]
    fn ping_reports_privileged_presence() {
        let (mut state, mut outbox) = relay(&[P, C1]);

        assert_eq!(send(&mut state, &mut outbox, C1, events::PING, Value::Null), RouteOutcome::Replied);
        assert_eq!(outbox.sent.len(), 1);
        assert_eq!(outbox.sent[0].0, C1);
        assert_eq!(outbox.sent[0].1.event, events::PONG);
        assert_eq!(outbox.sent[0].1.data["pythonConnected"], json!(false));

        send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);
        outbox.clear();
        send(&mut state, &mut outbox, C1, events::PING, Value::Null);
        assert_eq!(outbox.to(C1)[0].data["pythonConnected"], json!(true));
        assert!(outbox.to(C1)[0].data["timestamp"].as_i64().unwrap() > 0);
        assert!(outbox.to(P).is_empty());
    }

    #[test]
    fn unknown_event_is_ignored() {
        let (mut state, mut outbox) = relay(&[C1, C2]);
        let outcome = send(&mut state, &mut outbox, C1, "join-room", json!({}));
        assert_eq!(outcome, RouteOutcome::UnknownEvent);
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn claim_goes_through_coordinator() {
        let (mut state, mut outbox) = relay(&[P]);
        let outcome = send(&mut state, &mut outbox, P, events::CONNECT_PYTHON, Value::Null);
        assert_eq!(outcome, RouteOutcome::Claim(ClaimOutcome::Claimed { replaced: None }));
        assert!(outbox.sent.is_empty());
    }
}
