//! Call state manager behaviour, driven through decoded switch events

use async_trait::async_trait;
use cti_core::models::{CallSession, CallState, ExtensionRef, ParkOrbit};
use cti_core::traits::CallStore;
use cti_core::AppError;
use cti_esl::EslEvent;
use cti_services::{BroadcastHub, CallStateManager, ClientSink};
use mockall::mock;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Store that remembers every write
#[derive(Default)]
struct RecordingStore {
    calls: Mutex<Vec<CallSession>>,
    orbits: Mutex<Vec<ParkOrbit>>,
    extensions: Vec<ExtensionRef>,
}

#[async_trait]
impl CallStore for RecordingStore {
    async fn save_call(&self, call: &CallSession) -> Result<(), AppError> {
        self.calls.lock().push(call.clone());
        Ok(())
    }

    async fn save_orbit(&self, orbit: &ParkOrbit) -> Result<(), AppError> {
        self.orbits.lock().push(orbit.clone());
        Ok(())
    }

    async fn find_extension(&self, number: &str) -> Result<Option<ExtensionRef>, AppError> {
        Ok(self
            .extensions
            .iter()
            .find(|e| e.extension_number == number)
            .cloned())
    }
}

mock! {
    pub Store {}

    #[async_trait]
    impl CallStore for Store {
        async fn save_call(&self, call: &CallSession) -> Result<(), AppError>;
        async fn save_orbit(&self, orbit: &ParkOrbit) -> Result<(), AppError>;
        async fn find_extension(&self, number: &str) -> Result<Option<ExtensionRef>, AppError>;
    }
}

#[derive(Default)]
struct CapturingSink {
    sent: Mutex<Vec<String>>,
}

impl CapturingSink {
    fn messages(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    fn types(&self) -> Vec<String> {
        self.messages()
            .iter()
            .map(|m| m["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl ClientSink for CapturingSink {
    async fn send_text(&self, text: &str) -> Result<(), AppError> {
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}

struct Harness {
    manager: CallStateManager,
    store: Arc<RecordingStore>,
    sink: Arc<CapturingSink>,
}

fn harness_with(extensions: Vec<ExtensionRef>) -> Harness {
    let store = Arc::new(RecordingStore {
        extensions,
        ..RecordingStore::default()
    });
    let hub = Arc::new(BroadcastHub::new());
    let sink = Arc::new(CapturingSink::default());
    hub.connect(sink.clone(), None);
    Harness {
        manager: CallStateManager::new(store.clone(), hub),
        store,
        sink,
    }
}

fn harness() -> Harness {
    harness_with(Vec::new())
}

fn event(pairs: &[(&str, &str)]) -> EslEvent {
    EslEvent::from_headers(pairs.iter().copied())
}

fn create(uuid: &str, caller: &str, destination: &str, direction: &str) -> EslEvent {
    event(&[
        ("Event-Name", "CHANNEL_CREATE"),
        ("Unique-ID", uuid),
        ("Caller-Caller-ID-Number", caller),
        ("Caller-Destination-Number", destination),
        ("Call-Direction", direction),
        ("FreeSWITCH-Hostname", "pbx-01"),
    ])
}

fn named(name: &str, uuid: &str) -> EslEvent {
    event(&[("Event-Name", name), ("Unique-ID", uuid)])
}

fn park(uuid: &str, orbit: &str) -> EslEvent {
    event(&[
        ("Event-Name", "CHANNEL_PARK"),
        ("Unique-ID", uuid),
        ("variable_park_orbit", orbit),
    ])
}

#[tokio::test]
async fn test_channel_create_example() {
    let extension = ExtensionRef {
        id: Uuid::new_v4(),
        extension_number: "2002".to_string(),
    };
    let h = harness_with(vec![extension.clone()]);

    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;

    let call = h.manager.get_call("abc-1").unwrap();
    assert_eq!(call.state, CallState::Ringing);
    assert_eq!(call.extension, Some(extension));
    assert_eq!(call.metadata.get("switch_hostname").map(String::as_str), Some("pbx-01"));

    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["type"], "call_created");
    assert_eq!(messages[0]["data"]["uuid"], "abc-1");
    assert_eq!(messages[0]["data"]["state"], "RINGING");
    assert_eq!(messages[0]["data"]["extension"]["extension_number"], "2002");

    assert_eq!(h.store.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_outbound_resolves_caller_extension() {
    let extension = ExtensionRef {
        id: Uuid::new_v4(),
        extension_number: "1001".to_string(),
    };
    let h = harness_with(vec![extension.clone()]);

    h.manager
        .process_event(&create("abc-1", "1001", "5551234", "outbound"))
        .await;
    assert_eq!(h.manager.get_call("abc-1").unwrap().extension, Some(extension));
}

#[tokio::test]
async fn test_answer_moves_ringing_to_active_once() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    h.manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;
    h.manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;

    let call = h.manager.get_call("abc-1").unwrap();
    assert_eq!(call.state, CallState::Active);
    assert!(call.answered_at.is_some());

    assert_eq!(h.sink.types(), vec!["call_created", "call_answered"]);
    let states: Vec<CallState> = h.store.calls.lock().iter().map(|c| c.state).collect();
    assert_eq!(states, vec![CallState::Ringing, CallState::Active]);
}

#[tokio::test]
async fn test_hangup_is_idempotent() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    h.manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;

    let mut hangup = named("CHANNEL_HANGUP", "abc-1");
    hangup.set_header("Hangup-Cause", "NORMAL_CLEARING");
    h.manager.process_event(&hangup).await;
    h.manager
        .process_event(&named("CHANNEL_HANGUP_COMPLETE", "abc-1"))
        .await;

    assert!(h.manager.get_call("abc-1").is_none());
    assert_eq!(h.manager.active_count(), 0);

    let ended: Vec<CallSession> = h
        .store
        .calls
        .lock()
        .iter()
        .filter(|c| c.state == CallState::Ended)
        .cloned()
        .collect();
    assert_eq!(ended.len(), 1);
    assert!(ended[0].ended_at.is_some());
    assert_eq!(
        ended[0].metadata.get("hangup_cause").map(String::as_str),
        Some("NORMAL_CLEARING")
    );

    let types = h.sink.types();
    assert_eq!(types.iter().filter(|t| *t == "call_ended").count(), 1);
}

#[tokio::test]
async fn test_hangup_for_unknown_call_is_noop() {
    let h = harness();
    h.manager.process_event(&named("CHANNEL_HANGUP", "ghost")).await;
    assert!(h.store.calls.lock().is_empty());
    assert!(h.sink.messages().is_empty());
}

#[tokio::test]
async fn test_park_then_hangup_releases_orbit() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    h.manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;
    h.manager.process_event(&park("abc-1", "701")).await;

    let call = h.manager.get_call("abc-1").unwrap();
    assert_eq!(call.state, CallState::Parked);
    assert_eq!(call.park_orbit.as_deref(), Some("701"));

    let orbits = h.manager.park_orbits();
    assert_eq!(orbits.len(), 1);
    assert!(orbits[0].is_occupied);
    assert_eq!(orbits[0].occupied_by_call_uuid.as_deref(), Some("abc-1"));
    assert_eq!(h.sink.types().last().map(String::as_str), Some("call_parked"));

    h.manager.process_event(&named("CHANNEL_HANGUP", "abc-1")).await;

    let orbits = h.manager.park_orbits();
    assert!(!orbits[0].is_occupied);
    assert!(orbits[0].occupied_by_call_uuid.is_none());

    // occupied then released, both persisted
    let saved = h.store.orbits.lock();
    assert_eq!(saved.len(), 2);
    assert!(saved[0].is_occupied);
    assert!(!saved[1].is_occupied);
}

#[tokio::test]
async fn test_unpark_releases_orbit_and_reactivates() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    h.manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;
    h.manager.process_event(&park("abc-1", "701")).await;
    h.manager.process_event(&named("CHANNEL_UNPARK", "abc-1")).await;

    let call = h.manager.get_call("abc-1").unwrap();
    assert_eq!(call.state, CallState::Active);
    assert!(call.park_orbit.is_none());
    assert!(!h.manager.park_orbits()[0].is_occupied);
    assert_eq!(h.sink.types().last().map(String::as_str), Some("call_updated"));
}

#[tokio::test]
async fn test_held_call_can_be_parked_and_retrieved() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    h.manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;
    h.manager.process_event(&named("CHANNEL_HOLD", "abc-1")).await;
    h.manager.process_event(&park("abc-1", "701")).await;

    let call = h.manager.get_call("abc-1").unwrap();
    assert_eq!(call.state, CallState::Parked);
    assert_eq!(call.park_orbit.as_deref(), Some("701"));
    assert_eq!(
        h.manager.park_orbits()[0].occupied_by_call_uuid.as_deref(),
        Some("abc-1")
    );

    h.manager.process_event(&named("CHANNEL_UNPARK", "abc-1")).await;

    assert_eq!(h.manager.get_call("abc-1").unwrap().state, CallState::Active);
    assert!(!h.manager.park_orbits()[0].is_occupied);
    assert_eq!(
        h.sink.types(),
        vec![
            "call_created",
            "call_answered",
            "call_updated",
            "call_parked",
            "call_updated"
        ]
    );
}

#[tokio::test]
async fn test_ringing_call_can_be_parked() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    h.manager.process_event(&park("abc-1", "701")).await;

    assert_eq!(h.manager.get_call("abc-1").unwrap().state, CallState::Parked);
    assert!(h.manager.park_orbits()[0].is_occupied);
    assert_eq!(h.sink.types(), vec!["call_created", "call_parked"]);
}

#[tokio::test]
async fn test_ended_call_records_talk_time() {
    let h = harness();
    let mut created = create("abc-1", "1001", "2002", "inbound");
    created.set_header("Event-Date-Timestamp", "1700000000000000");
    h.manager.process_event(&created).await;

    let mut answer = named("CHANNEL_ANSWER", "abc-1");
    answer.set_header("Event-Date-Timestamp", "1700000005000000");
    h.manager.process_event(&answer).await;

    let mut hangup = named("CHANNEL_HANGUP", "abc-1");
    hangup.set_header("Event-Date-Timestamp", "1700000047000000");
    h.manager.process_event(&hangup).await;

    let ended = h.sink.messages().pop().unwrap();
    assert_eq!(ended["type"], "call_ended");
    assert_eq!(ended["data"]["metadata"]["talk_seconds"], "42");
}

#[tokio::test]
async fn test_unknown_event_is_ignored() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    let before = h.manager.get_call("abc-1");

    h.manager.process_event(&named("DTMF", "abc-1")).await;

    assert_eq!(h.manager.get_call("abc-1"), before);
    assert_eq!(h.sink.messages().len(), 1);
    assert_eq!(h.store.calls.lock().len(), 1);
}

#[tokio::test]
async fn test_malformed_event_does_not_stop_processing() {
    let h = harness();
    h.manager
        .process_event(&event(&[("Event-Name", "CHANNEL_CREATE")]))
        .await;
    assert_eq!(h.manager.active_count(), 0);

    h.manager
        .process_event(&create("abc-2", "1001", "2002", "inbound"))
        .await;
    assert_eq!(h.manager.active_count(), 1);
}

#[tokio::test]
async fn test_conference_events_pass_through() {
    let h = harness();
    h.manager
        .process_event(&event(&[
            ("Event-Name", "CUSTOM"),
            ("Event-Subclass", "conference::maniac"),
            ("Action", "add-member"),
            ("Conference-Name", "sales"),
            ("Member-ID", "12"),
            ("Caller-Caller-ID-Number", "1001"),
        ]))
        .await;
    h.manager
        .process_event(&event(&[
            ("Event-Name", "CONFERENCE_MEMBER_DEL"),
            ("Conference-Name", "sales"),
            ("Member-ID", "12"),
        ]))
        .await;

    let messages = h.sink.messages();
    assert_eq!(messages[0]["type"], "conference_member_add");
    assert_eq!(messages[0]["data"]["conference_name"], "sales");
    assert_eq!(messages[0]["data"]["caller_id_number"], "1001");
    assert_eq!(messages[1]["type"], "conference_member_del");
    assert_eq!(h.manager.active_count(), 0);
    assert!(h.store.calls.lock().is_empty());
}

#[tokio::test]
async fn test_conference_membership_is_tracked_on_the_call() {
    let h = harness();
    h.manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    h.manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;

    let member = |name: &str| {
        event(&[
            ("Event-Name", name),
            ("Unique-ID", "abc-1"),
            ("Conference-Name", "sales"),
            ("Member-ID", "3"),
        ])
    };

    h.manager.process_event(&member("CONFERENCE_MEMBER_ADD")).await;
    let call = h.manager.get_call("abc-1").unwrap();
    assert_eq!(call.conference_name.as_deref(), Some("sales"));
    assert_eq!(
        h.store.calls.lock().last().unwrap().conference_name.as_deref(),
        Some("sales")
    );

    h.manager.process_event(&member("CONFERENCE_MEMBER_DEL")).await;
    assert!(h.manager.get_call("abc-1").unwrap().conference_name.is_none());
}

#[tokio::test]
async fn test_persistence_failure_keeps_in_memory_transition() {
    let mut store = MockStore::new();
    store
        .expect_find_extension()
        .returning(|_| Err(AppError::Persistence("db down".to_string())));
    store
        .expect_save_call()
        .times(2)
        .returning(|_| Err(AppError::Persistence("db down".to_string())));

    let hub = Arc::new(BroadcastHub::new());
    let sink = Arc::new(CapturingSink::default());
    hub.connect(sink.clone(), None);
    let manager = CallStateManager::new(Arc::new(store), hub);

    manager
        .process_event(&create("abc-1", "1001", "2002", "inbound"))
        .await;
    manager.process_event(&named("CHANNEL_ANSWER", "abc-1")).await;

    let call = manager.get_call("abc-1").unwrap();
    assert_eq!(call.state, CallState::Active);
    assert!(call.extension.is_none());
    assert_eq!(sink.types(), vec!["call_created", "call_answered"]);
}

#[tokio::test]
async fn test_snapshot_is_oldest_first() {
    let h = harness();
    for (uuid, ts) in [("late", "1700000002000000"), ("early", "1700000001000000")] {
        let mut created = create(uuid, "1001", "2002", "inbound");
        created.set_header("Event-Date-Timestamp", ts);
        h.manager.process_event(&created).await;
    }

    let uuids: Vec<String> = h
        .manager
        .get_active_calls()
        .into_iter()
        .map(|c| c.uuid)
        .collect();
    assert_eq!(uuids, vec!["early", "late"]);
}
