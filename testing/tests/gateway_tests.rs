//! End-to-end tests of the correlation engine over the in-memory broker.
//!
//! These exercise the dispatcher, the reply demultiplexer, the terminator,
//! and the entity resolver together, with time driven by [`MockClock`] and
//! tokio's paused clock.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{
    default_completion, BrokerTransport, Envelope, ErrorCode, Gateway, GatewayConfig, Intention,
    RefSpec, RequestMessage, Responder, ResolverRegistry, RoutingKey, ValidationError,
};
use switchboard_testing::{echo_service, reply_frame, InMemoryBroker, MockClock};
use tokio::sync::oneshot;

async fn start_gateway(registry: ResolverRegistry) -> (Gateway, Arc<InMemoryBroker>, MockClock) {
    let broker = Arc::new(InMemoryBroker::new());
    let clock = MockClock::default();
    let gateway = Gateway::new(
        broker.clone() as Arc<dyn BrokerTransport>,
        Arc::new(clock.clone()),
        GatewayConfig::default(),
        registry,
    );
    gateway.start().await.expect("gateway starts");
    (gateway, broker, clock)
}

/// Dispatch a READ for `entity` and return the receiver plus the wire id.
async fn dispatch_read(
    gateway: &Gateway,
    entity: &str,
    fields: Value,
) -> (oneshot::Receiver<switchboard_core::GatewayResponse>, u64) {
    let id = gateway.next_id();
    let mut message = RequestMessage::new(id, Intention::Read, "u1");
    if let Value::Object(map) = fields {
        message = message.with_fields(map);
    }
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read(entity),
            message,
            responder,
            default_completion(),
            None,
        )
        .await;
    (rx, id.value())
}

#[tokio::test(start_paused = true)]
async fn reply_within_deadline_completes_with_payload() {
    let (gateway, broker, _clock) = start_gateway(ResolverRegistry::new()).await;

    let (rx, id) = dispatch_read(&gateway, "equipment", json!({})).await;
    let published = broker.published_to("equipment.details.get");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload["msg_intention"], "READ");
    assert_eq!(published[0].payload["status"], 0);
    assert_eq!(published[0].payload["userID"], "u1");

    broker.inject_frame(reply_frame(id, 0, json!([])));

    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 200);
    assert!(matches!(response.body, Envelope::Ok { result: Value::Array(ref a) } if a.is_empty()));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.pending(), 0);
    assert_eq!(gateway.outstanding_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_reply_fires_completion_once() {
    let (gateway, _broker, _clock) = start_gateway(ResolverRegistry::new()).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let count = fired.clone();
    let id = gateway.next_id();
    let (responder, _rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            Box::new(move |_, _, _, _| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        )
        .await;

    gateway.handle_frame(&reply_frame(id.value(), 0, json!([])));
    gateway.handle_frame(&reply_frame(id.value(), 0, json!([])));
    gateway.handle_frame(&reply_frame(id.value(), 0, json!([])));

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn unmatched_reply_is_dropped_without_effect() {
    let (gateway, broker, _clock) = start_gateway(ResolverRegistry::new()).await;

    gateway.handle_frame(&reply_frame(999_999, 0, json!([])));
    assert_eq!(gateway.pending(), 0);

    // The engine still works afterwards.
    let (rx, id) = dispatch_read(&gateway, "equipment", json!({})).await;
    broker.inject_frame(reply_frame(id, 0, json!([{"id": "e1"}])));
    assert_eq!(rx.await.expect("responder answered").status, 200);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_dropped() {
    let (gateway, _broker, _clock) = start_gateway(ResolverRegistry::new()).await;

    let (rx, id) = dispatch_read(&gateway, "equipment", json!({})).await;

    gateway.handle_frame(b"not json at all");
    gateway.handle_frame(b"[1, 2, 3]");
    gateway.handle_frame(br#"{"status": 0}"#);
    gateway.handle_frame(br#"{"msg_id": "three", "status": 0}"#);
    gateway.handle_frame(&format!(r#"{{"msg_id": {id}, "status": "zero"}}"#).into_bytes());

    // The pending record survived all of it.
    assert_eq!(gateway.pending(), 1);
    gateway.handle_frame(&reply_frame(id, 0, json!([])));
    assert_eq!(rx.await.expect("responder answered").status, 200);
}

#[tokio::test(start_paused = true)]
async fn silent_service_times_out_with_504() {
    let (gateway, _broker, clock) = start_gateway(ResolverRegistry::new()).await;

    let (rx, id) = dispatch_read(&gateway, "equipment", json!({"id": "abc"})).await;

    clock.advance_ms(15_001);
    gateway.sweep_expired();

    let response = rx.await.expect("terminator answered");
    assert_eq!(response.status, 504);
    let Envelope::Fail { error } = response.body else {
        panic!("expected failure envelope");
    };
    assert_eq!(error.code, ErrorCode::ServiceTimeout);

    // The late reply is dropped and the id was released.
    gateway.handle_frame(&reply_frame(id, 0, json!([])));
    assert_eq!(gateway.pending(), 0);
    assert_eq!(gateway.outstanding_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn reply_on_the_deadline_still_completes() {
    let (gateway, _broker, clock) = start_gateway(ResolverRegistry::new()).await;

    let (rx, id) = dispatch_read(&gateway, "equipment", json!({})).await;

    // Exactly at the deadline: the sweep must not claim the record.
    clock.advance_ms(15_000);
    gateway.sweep_expired();
    assert_eq!(gateway.pending(), 1);

    gateway.handle_frame(&reply_frame(id, 0, json!([{"id": "e1"}])));
    assert_eq!(rx.await.expect("responder answered").status, 200);
}

#[tokio::test(start_paused = true)]
async fn terminated_record_never_fires_completion() {
    let (gateway, _broker, clock) = start_gateway(ResolverRegistry::new()).await;

    let fired = Arc::new(AtomicUsize::new(0));
    let count = fired.clone();
    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            Box::new(move |_, _, _, _| {
                count.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        )
        .await;

    clock.advance_ms(15_001);
    gateway.sweep_expired();
    assert_eq!(rx.await.expect("terminator answered").status, 504);

    gateway.handle_frame(&reply_frame(id.value(), 0, json!([])));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_publish_expires_via_sweep() {
    let (gateway, broker, clock) = start_gateway(ResolverRegistry::new()).await;
    broker.reject_publishes(true);

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    let accepted = gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            default_completion(),
            None,
        )
        .await;
    assert!(!accepted);
    assert_eq!(gateway.pending(), 1);

    clock.advance_ms(15_001);
    gateway.sweep_expired();
    assert_eq!(rx.await.expect("terminator answered").status, 504);
}

#[tokio::test(start_paused = true)]
async fn validator_rejection_leaves_caller_to_time_out() {
    let (gateway, _broker, clock) = start_gateway(ResolverRegistry::new()).await;

    let id = gateway.next_id();
    let (responder, mut rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            default_completion(),
            Some(Box::new(|reply| {
                Ok(reply.result().map(Value::is_array).unwrap_or(false))
            })),
        )
        .await;

    // Reply whose payload is not the declared list shape: rejected.
    gateway.handle_frame(&reply_frame(id.value(), 0, json!("scalar")));

    // No response was written; the record was parked for the terminator.
    assert!(rx.try_recv().is_err());
    assert_eq!(gateway.pending(), 1);

    // The client times out at the deadline like any silent service.
    clock.advance_ms(15_001);
    gateway.sweep_expired();
    let response = rx.await.expect("terminator answered");
    assert_eq!(response.status, 504);
    assert_eq!(gateway.pending(), 0);
    assert_eq!(gateway.outstanding_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn validator_error_is_swallowed_like_rejection() {
    let (gateway, _broker, clock) = start_gateway(ResolverRegistry::new()).await;

    let id = gateway.next_id();
    let (responder, mut rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            default_completion(),
            Some(Box::new(|_| Err(ValidationError("schema unavailable".into())))),
        )
        .await;

    gateway.handle_frame(&reply_frame(id.value(), 0, json!([])));
    assert!(rx.try_recv().is_err());
    assert_eq!(gateway.pending(), 1);

    clock.advance_ms(15_001);
    gateway.sweep_expired();
    assert_eq!(rx.await.expect("terminator answered").status, 504);
    assert_eq!(gateway.outstanding_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn validator_acceptance_fires_completion() {
    let (gateway, _broker, _clock) = start_gateway(ResolverRegistry::new()).await;

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            default_completion(),
            Some(Box::new(|reply| {
                Ok(reply.result().map(Value::is_array).unwrap_or(false))
            })),
        )
        .await;

    gateway.handle_frame(&reply_frame(id.value(), 0, json!([])));
    assert_eq!(rx.await.expect("responder answered").status, 200);
}

fn equipment_registry() -> ResolverRegistry {
    ResolverRegistry::new().with_spec(RefSpec::new("equipment", [("locationID", "venue")]))
}

#[tokio::test(start_paused = true)]
async fn resolver_inflates_reference_fields() {
    let (gateway, broker, _clock) = start_gateway(equipment_registry()).await;
    broker.script(
        "venue.details.get",
        echo_service(json!([{"id": "loc1", "name": "Hall"}])),
    );

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1").with_field("id", json!("abc")),
            responder,
            gateway.resolve_one("equipment", default_completion()),
            None,
        )
        .await;

    broker.inject_frame(reply_frame(
        id.value(),
        0,
        json!([{"id": "abc", "locationID": "loc1"}]),
    ));

    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 200);
    let Envelope::Ok { result } = response.body else {
        panic!("expected success envelope");
    };
    assert_eq!(result[0]["locationID"], json!({"id": "loc1", "name": "Hall"}));

    // Sub-fetch went to the well-known read key with a fresh id.
    let lookups = broker.published_to("venue.details.get");
    assert_eq!(lookups.len(), 1);
    assert_eq!(lookups[0].payload["id"], "loc1");
    assert_eq!(lookups[0].payload["msg_intention"], "READ");
    assert_ne!(lookups[0].msg_id(), Some(id.value()));

    // Everything was released: outer id, sub-fetch id, intercepts.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.outstanding_ids(), 0);
    assert_eq!(gateway.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn resolver_fetches_each_unique_reference_once() {
    let (gateway, broker, _clock) = start_gateway(equipment_registry()).await;
    broker.script(
        "venue.details.get",
        echo_service(json!([{"id": "loc1", "name": "Hall"}])),
    );

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            gateway.resolve_list("equipment", default_completion()),
            None,
        )
        .await;

    // Three items, one shared location.
    broker.inject_frame(reply_frame(
        id.value(),
        0,
        json!([
            {"id": "a", "locationID": "loc1"},
            {"id": "b", "locationID": "loc1"},
            {"id": "c", "locationID": "loc1"}
        ]),
    ));

    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 200);
    let Envelope::Ok { result } = response.body else {
        panic!("expected success envelope");
    };
    for item in result.as_array().expect("list payload") {
        assert_eq!(item["locationID"]["name"], "Hall");
    }
    assert_eq!(broker.published_to("venue.details.get").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resolver_subfetch_failure_surfaces_500() {
    let (gateway, broker, _clock) = start_gateway(equipment_registry()).await;
    broker.script("venue.details.get", |request| {
        let msg_id = request.get("msg_id")?.as_u64()?;
        Some(json!({"msg_id": msg_id, "status": 500}))
    });

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1").with_field("id", json!("abc")),
            responder,
            gateway.resolve_one("equipment", default_completion()),
            None,
        )
        .await;

    broker.inject_frame(reply_frame(
        id.value(),
        0,
        json!([{"id": "abc", "locationID": "loc1"}]),
    ));

    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 500);
    let Envelope::Fail { error } = response.body else {
        panic!("expected failure envelope");
    };
    assert_eq!(error.code, ErrorCode::InternalError);

    // Both the outer id and the sub-fetch id were released exactly once.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.outstanding_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn resolver_subfetch_timeout_surfaces_500() {
    let (gateway, broker, _clock) = start_gateway(equipment_registry()).await;
    // No script for venues: the sub-fetch never gets an answer.

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1").with_field("id", json!("abc")),
            responder,
            gateway.resolve_one("equipment", default_completion()),
            None,
        )
        .await;

    broker.inject_frame(reply_frame(
        id.value(),
        0,
        json!([{"id": "abc", "locationID": "loc1"}]),
    ));

    // Paused tokio time fast-forwards through the sub-fetch deadline.
    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 500);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.outstanding_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn resolver_bounds_reference_depth() {
    // a → b → c → d: three levels of references exceed the bound of two.
    let registry = ResolverRegistry::new()
        .with_spec(RefSpec::new("alpha", [("betaID", "beta")]))
        .with_spec(RefSpec::new("beta", [("gammaID", "gamma")]))
        .with_spec(RefSpec::new("gamma", [("deltaID", "delta")]));
    let (gateway, broker, _clock) = start_gateway(registry).await;

    broker.script("beta.details.get", |request| {
        let msg_id = request.get("msg_id")?.as_u64()?;
        Some(json!({"msg_id": msg_id, "status": 0, "result": [{"id": "b1", "gammaID": "g1"}]}))
    });
    broker.script("gamma.details.get", |request| {
        let msg_id = request.get("msg_id")?.as_u64()?;
        Some(json!({"msg_id": msg_id, "status": 0, "result": [{"id": "g1", "deltaID": "d1"}]}))
    });
    broker.script("delta.details.get", |request| {
        let msg_id = request.get("msg_id")?.as_u64()?;
        Some(json!({"msg_id": msg_id, "status": 0, "result": [{"id": "d1"}]}))
    });

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("alpha"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            gateway.resolve_one("alpha", default_completion()),
            None,
        )
        .await;

    broker.inject_frame(reply_frame(id.value(), 0, json!([{"id": "a1", "betaID": "b1"}])));

    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 500);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(gateway.outstanding_ids(), 0);
}

#[tokio::test(start_paused = true)]
async fn resolver_passes_failed_outer_replies_through() {
    let (gateway, broker, _clock) = start_gateway(equipment_registry()).await;

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("equipment"),
            RequestMessage::new(id, Intention::Read, "u1").with_field("id", json!("nope")),
            responder,
            gateway.resolve_one("equipment", default_completion()),
            None,
        )
        .await;

    broker.inject_frame(reply_frame(id.value(), 404, json!(null)));

    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 404);
    // No sub-fetches were attempted.
    assert!(broker.published_to("venue.details.get").is_empty());
}

#[tokio::test(start_paused = true)]
async fn entities_without_declared_references_pass_through() {
    let (gateway, broker, _clock) = start_gateway(ResolverRegistry::new()).await;

    let id = gateway.next_id();
    let (responder, rx) = Responder::channel();
    gateway
        .send_request(
            &RoutingKey::read("venue"),
            RequestMessage::new(id, Intention::Read, "u1"),
            responder,
            gateway.resolve_list("venue", default_completion()),
            None,
        )
        .await;

    broker.inject_frame(reply_frame(id.value(), 0, json!([{"id": "loc1"}])));
    let response = rx.await.expect("responder answered");
    assert_eq!(response.status, 200);
    assert_eq!(broker.published().len(), 1);
}
