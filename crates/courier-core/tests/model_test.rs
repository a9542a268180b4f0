//! Integration tests for core domain models.
//!
//! Covers the wire shape of submissions, queue events, and statuses as other
//! crates and the binary exchange them.

use chrono::{TimeZone, Utc};
use courier_core::{
    models::{DeliveryStatus, Job, JobSpec, Message, Priority, SubmitOutcome},
    QueueEvent,
};
use serde_json::json;

/// Submissions arrive as flat JSON and default to normal priority.
#[test]
fn job_spec_deserializes_flat_submission() {
    let raw = json!({
        "id": "welcome-1",
        "recipient": "alice@example.com",
        "subject": "Welcome",
        "body": "Hello Alice",
    });

    let spec: JobSpec = serde_json::from_value(raw).unwrap();

    assert_eq!(spec.id.as_str(), "welcome-1");
    assert_eq!(spec.message, Message::new("alice@example.com", "Welcome", "Hello Alice"));
    assert_eq!(spec.priority, Priority::Normal);
}

#[test]
fn job_spec_accepts_explicit_priority() {
    let raw = json!({
        "id": "reset-7",
        "recipient": "bob@example.com",
        "subject": "Password reset",
        "body": "Click the link",
        "priority": "high",
    });

    let spec: JobSpec = serde_json::from_value(raw).unwrap();
    assert_eq!(spec.priority, Priority::High);
}

#[test]
fn unknown_priority_is_rejected() {
    let raw = json!({
        "id": "x",
        "recipient": "r",
        "subject": "s",
        "body": "b",
        "priority": "urgent",
    });

    assert!(serde_json::from_value::<JobSpec>(raw).is_err());
}

/// Queue events carry a tag so log shippers can route them.
#[test]
fn queue_event_is_tagged() {
    let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let job = Job::new(JobSpec::new("a", Message::new("r", "s", "b")), created_at);

    let value = serde_json::to_value(QueueEvent::Failed {
        job,
        reason: "all backends exhausted".into(),
    })
    .unwrap();

    assert_eq!(value["event"], "failed");
    assert_eq!(value["job"]["retry_count"], 0);
    assert_eq!(value["reason"], "all backends exhausted");
}

#[test]
fn statuses_round_trip_through_json() {
    for status in [
        DeliveryStatus::Queued,
        DeliveryStatus::Processing,
        DeliveryStatus::Sent { backend: "primary".into() },
        DeliveryStatus::AllProvidersFailed,
        DeliveryStatus::FailedInQueue,
    ] {
        let encoded = serde_json::to_string(&status).unwrap();
        let decoded: DeliveryStatus = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, status);
    }
}

#[test]
fn submit_outcome_wire_names() {
    assert_eq!(serde_json::to_value(SubmitOutcome::RateLimited).unwrap(), json!("rate_limited"));
    assert_eq!(SubmitOutcome::Duplicate.to_string(), "duplicate");
}
