//! Call state manager
//!
//! Folds switch events into per-call state:
//! - Create sessions on channel creation and resolve their extension
//! - Drive the RINGING/ACTIVE/HELD/PARKED/ENDED lifecycle
//! - Keep park orbit occupancy in step with parked calls
//! - Persist every transition through the `CallStore`
//! - Broadcast a delta for every transition
//!
//! State is mutated under one lock and released before any I/O. Storage
//! failures are logged; the in-memory snapshot stays authoritative.

use crate::broadcast::BroadcastHub;
use crate::messages::ClientMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cti_core::models::{CallDirection, CallSession, CallState, ConferenceEvent, ParkOrbit};
use cti_core::traits::CallStore;
use cti_core::{AppError, AppResult};
use cti_esl::{events, EslClient, EslEvent, EventHandler};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Metadata keys recorded on sessions
pub mod metadata {
    pub const SWITCH_HOSTNAME: &str = "switch_hostname";
    pub const HANGUP_CAUSE: &str = "hangup_cause";
    pub const TALK_SECONDS: &str = "talk_seconds";
}

/// A switch event reduced to what the state machine needs
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    Created {
        uuid: String,
        direction: CallDirection,
        caller_id_number: String,
        caller_id_name: Option<String>,
        destination_number: String,
        hostname: Option<String>,
        at: DateTime<Utc>,
    },
    Answered {
        uuid: String,
        at: DateTime<Utc>,
    },
    Held {
        uuid: String,
    },
    Unheld {
        uuid: String,
    },
    Parked {
        uuid: String,
        orbit: String,
        at: DateTime<Utc>,
    },
    Unparked {
        uuid: String,
    },
    Hangup {
        uuid: String,
        cause: Option<String>,
        at: DateTime<Utc>,
    },
    ConferenceMember {
        joined: bool,
        member: ConferenceEvent,
        /// Channel of the member, when the event carries one
        call_uuid: Option<String>,
    },
}

fn required<'a>(event: &'a EslEvent, header: &str) -> AppResult<&'a str> {
    event
        .get_header(header)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Decode(format!("missing {}", header)))
}

fn conference_member(event: &EslEvent, joined: bool) -> AppResult<CallEvent> {
    Ok(CallEvent::ConferenceMember {
        joined,
        member: ConferenceEvent {
            conference_name: required(event, "Conference-Name")?.to_string(),
            member_id: required(event, "Member-ID")?.to_string(),
            caller_id_number: event.caller_number().map(str::to_string),
        },
        call_uuid: event.unique_id().map(str::to_string),
    })
}

impl CallEvent {
    /// Classify a decoded event. `Ok(None)` for kinds the state machine does
    /// not track, `Err(Decode)` when a tracked kind lacks a required field.
    pub fn classify(event: &EslEvent) -> AppResult<Option<CallEvent>> {
        let Some(key) = event.dispatch_key() else {
            return Ok(None);
        };
        let at = event.timestamp().unwrap_or_else(Utc::now);
        let uuid = || required(event, "Unique-ID").map(str::to_string);

        let classified = match key {
            events::CHANNEL_CREATE => CallEvent::Created {
                uuid: uuid()?,
                direction: CallDirection::parse(event.direction().unwrap_or("")),
                caller_id_number: event.caller_number().unwrap_or("").to_string(),
                caller_id_name: event.caller_name().map(str::to_string),
                destination_number: event.destination_number().unwrap_or("").to_string(),
                hostname: event.hostname().map(str::to_string),
                at,
            },
            events::CHANNEL_ANSWER => CallEvent::Answered { uuid: uuid()?, at },
            events::CHANNEL_HOLD => CallEvent::Held { uuid: uuid()? },
            events::CHANNEL_UNHOLD => CallEvent::Unheld { uuid: uuid()? },
            events::CHANNEL_PARK => CallEvent::Parked {
                uuid: uuid()?,
                orbit: required(event, "variable_park_orbit")?.to_string(),
                at,
            },
            events::CHANNEL_UNPARK => CallEvent::Unparked { uuid: uuid()? },
            events::CHANNEL_HANGUP | events::CHANNEL_HANGUP_COMPLETE => CallEvent::Hangup {
                uuid: uuid()?,
                cause: event.hangup_cause().map(str::to_string),
                at,
            },
            events::CONFERENCE_MEMBER_ADD => conference_member(event, true)?,
            events::CONFERENCE_MEMBER_DEL => conference_member(event, false)?,
            events::CONFERENCE_MANIAC => match event.action() {
                Some("add-member") => conference_member(event, true)?,
                Some("del-member") => conference_member(event, false)?,
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(classified))
    }
}

/// Records to persist and the delta to broadcast for one transition
#[derive(Debug)]
struct Transition {
    calls: Vec<CallSession>,
    orbits: Vec<ParkOrbit>,
    message: ClientMessage,
}

impl Transition {
    fn call(call: &CallSession, message: ClientMessage) -> Self {
        Self {
            calls: vec![call.clone()],
            orbits: Vec::new(),
            message,
        }
    }
}

#[derive(Default)]
struct CallTable {
    active: HashMap<String, CallSession>,
    orbits: HashMap<String, ParkOrbit>,
}

fn allowed(call: &CallSession, from: CallState, to: CallState) -> bool {
    if call.state == from && from.can_transition_to(to) {
        return true;
    }
    warn!(
        call_uuid = %call.uuid,
        state = %call.state,
        next = %to,
        "Ignoring invalid transition"
    );
    false
}

impl CallTable {
    fn apply(&mut self, event: CallEvent) -> Option<Transition> {
        match event {
            // creation needs the extension lookup and is handled by the manager
            CallEvent::Created { .. } => None,

            CallEvent::Answered { uuid, at } => {
                let call = self.live(&uuid)?;
                if !allowed(call, CallState::Ringing, CallState::Active) {
                    return None;
                }
                call.state = CallState::Active;
                call.answered_at = Some(at);
                Some(Transition::call(call, ClientMessage::CallAnswered(call.clone())))
            }

            CallEvent::Held { uuid } => {
                let call = self.live(&uuid)?;
                if !allowed(call, CallState::Active, CallState::Held) {
                    return None;
                }
                call.state = CallState::Held;
                Some(Transition::call(call, ClientMessage::CallUpdated(call.clone())))
            }

            CallEvent::Unheld { uuid } => {
                let call = self.live(&uuid)?;
                if !allowed(call, CallState::Held, CallState::Active) {
                    return None;
                }
                call.state = CallState::Active;
                Some(Transition::call(call, ClientMessage::CallUpdated(call.clone())))
            }

            CallEvent::Parked { uuid, orbit, at } => self.park(&uuid, orbit, at),

            CallEvent::Unparked { uuid } => {
                let call = self.active.get_mut(&uuid)?;
                if !allowed(call, CallState::Parked, CallState::Active) {
                    return None;
                }
                call.state = CallState::Active;
                let orbit = call.park_orbit.take();
                let call = call.clone();

                let mut transition = Transition::call(&call, ClientMessage::CallUpdated(call.clone()));
                transition.orbits.extend(self.release_orbit(orbit.as_deref(), &uuid));
                Some(transition)
            }

            CallEvent::Hangup { uuid, cause, at } => {
                let Some(mut call) = self.active.remove(&uuid) else {
                    debug!(call_uuid = %uuid, "Hangup for unknown or ended call");
                    return None;
                };
                call.state = CallState::Ended;
                call.ended_at = Some(at);
                if call.answered_at.is_some() {
                    call.metadata.insert(
                        metadata::TALK_SECONDS.to_string(),
                        call.talk_seconds(at).to_string(),
                    );
                }
                if let Some(cause) = cause {
                    call.metadata
                        .insert(metadata::HANGUP_CAUSE.to_string(), cause);
                }
                let orbit = call.park_orbit.clone();

                let mut transition = Transition::call(&call, ClientMessage::CallEnded(call.clone()));
                transition.orbits.extend(self.release_orbit(orbit.as_deref(), &uuid));
                Some(transition)
            }

            CallEvent::ConferenceMember {
                joined,
                member,
                call_uuid,
            } => {
                let mut calls = Vec::new();
                let member_call = match call_uuid {
                    Some(uuid) => self.active.get_mut(&uuid),
                    None => None,
                };
                if let Some(call) = member_call {
                    if joined {
                        call.conference_name = Some(member.conference_name.clone());
                    } else if call.conference_name.as_deref() == Some(member.conference_name.as_str()) {
                        call.conference_name = None;
                    }
                    calls.push(call.clone());
                }
                Some(Transition {
                    calls,
                    orbits: Vec::new(),
                    message: if joined {
                        ClientMessage::ConferenceMemberAdd(member)
                    } else {
                        ClientMessage::ConferenceMemberDel(member)
                    },
                })
            }
        }
    }

    fn live(&mut self, uuid: &str) -> Option<&mut CallSession> {
        let call = self.active.get_mut(uuid);
        if call.is_none() {
            debug!(call_uuid = %uuid, "Event for unknown call");
        }
        call
    }

    fn park(&mut self, uuid: &str, orbit_number: String, at: DateTime<Utc>) -> Option<Transition> {
        let call = self.live(uuid)?;
        let moved_from = if call.state == CallState::Parked {
            match call.park_orbit.clone() {
                Some(current) if current == orbit_number => {
                    debug!(call_uuid = %uuid, orbit = %orbit_number, "Already parked in orbit");
                    return None;
                }
                current => current,
            }
        } else if allowed(call, call.state, CallState::Parked) {
            None
        } else {
            return None;
        };
        let released = self.release_orbit(moved_from.as_deref(), uuid);

        let orbit = self
            .orbits
            .entry(orbit_number.clone())
            .or_insert_with(|| ParkOrbit::vacant(orbit_number.as_str()));
        let displaced = orbit.occupy(uuid, at);
        let orbit = orbit.clone();

        let mut calls = Vec::with_capacity(2);
        if let Some(previous) = displaced {
            if let Some(other) = self.active.get_mut(&previous) {
                warn!(
                    orbit = %orbit.orbit_number,
                    displaced = %previous,
                    call_uuid = %uuid,
                    "Orbit already occupied, newer park wins"
                );
                other.park_orbit = None;
                calls.push(other.clone());
            }
        }

        let call = self.active.get_mut(uuid)?;
        call.state = CallState::Parked;
        call.park_orbit = Some(orbit_number);
        let call = call.clone();
        calls.insert(0, call.clone());

        let mut orbits: Vec<ParkOrbit> = released.into_iter().collect();
        orbits.push(orbit);

        Some(Transition {
            calls,
            orbits,
            message: ClientMessage::CallParked(call),
        })
    }

    fn release_orbit(&mut self, orbit_number: Option<&str>, uuid: &str) -> Option<ParkOrbit> {
        let orbit = self.orbits.get_mut(orbit_number?)?;
        if !orbit.is_held_by(uuid) {
            return None;
        }
        orbit.release();
        Some(orbit.clone())
    }
}

/// Authoritative snapshot of live calls
pub struct CallStateManager {
    store: Arc<dyn CallStore>,
    hub: Arc<BroadcastHub>,
    table: Mutex<CallTable>,
}

impl CallStateManager {
    pub fn new(store: Arc<dyn CallStore>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            store,
            hub,
            table: Mutex::new(CallTable::default()),
        }
    }

    /// Register this manager for every event kind it consumes
    pub fn subscribe(self: &Arc<Self>, client: &EslClient) {
        for kind in events::CALL_EVENTS {
            client.register_handler(*kind, self.clone());
        }
    }

    /// Apply one switch event. Malformed events are logged and dropped.
    pub async fn process_event(&self, event: &EslEvent) {
        let call_event = match CallEvent::classify(event) {
            Ok(Some(call_event)) => call_event,
            Ok(None) => {
                debug!(event = event.dispatch_key().unwrap_or("-"), "Ignoring event");
                return;
            }
            Err(e) => {
                warn!(
                    event = event.dispatch_key().unwrap_or("-"),
                    error = %e,
                    "Dropping malformed event"
                );
                return;
            }
        };
        self.apply(call_event).await;
    }

    /// Apply an already classified event
    pub async fn apply(&self, event: CallEvent) {
        let transition = match event {
            CallEvent::Created {
                uuid,
                direction,
                caller_id_number,
                caller_id_name,
                destination_number,
                hostname,
                at,
            } => {
                let mut call =
                    CallSession::ringing(uuid, direction, caller_id_number, destination_number, at);
                call.caller_id_name = caller_id_name;
                if let Some(hostname) = hostname {
                    call.metadata
                        .insert(metadata::SWITCH_HOSTNAME.to_string(), hostname);
                }
                self.create(call).await
            }
            other => self.apply_locked(other),
        };

        if let Some(transition) = transition {
            self.commit(transition).await;
        }
    }

    fn apply_locked(&self, event: CallEvent) -> Option<Transition> {
        self.table.lock().apply(event)
    }

    #[instrument(skip(self, call), fields(call_uuid = %call.uuid))]
    async fn create(&self, mut call: CallSession) -> Option<Transition> {
        if self.table.lock().active.contains_key(&call.uuid) {
            debug!("Duplicate channel create");
            return None;
        }

        let lookup = call
            .extension_lookup_number()
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        if let Some(number) = lookup {
            match self.store.find_extension(&number).await {
                Ok(extension) => call.extension = extension,
                Err(e) => warn!(number = %number, error = %e, "Extension lookup failed"),
            }
        }

        let mut table = self.table.lock();
        if table.active.contains_key(&call.uuid) {
            return None;
        }
        table.active.insert(call.uuid.clone(), call.clone());
        info!(
            direction = call.direction.as_str(),
            caller = %call.caller_id_number,
            destination = %call.destination_number,
            active = table.active.len(),
            "Call created"
        );
        Some(Transition::call(&call, ClientMessage::CallCreated(call.clone())))
    }

    async fn commit(&self, transition: Transition) {
        for call in &transition.calls {
            if let Err(e) = self.store.save_call(call).await {
                warn!(call_uuid = %call.uuid, state = %call.state, error = %e, "Failed to persist call");
            }
        }
        for orbit in &transition.orbits {
            if let Err(e) = self.store.save_orbit(orbit).await {
                warn!(orbit = %orbit.orbit_number, error = %e, "Failed to persist park orbit");
            }
        }
        self.hub.broadcast(&transition.message).await;
    }

    /// Non-terminal sessions, oldest first
    pub fn get_active_calls(&self) -> Vec<CallSession> {
        let mut calls: Vec<CallSession> = self.table.lock().active.values().cloned().collect();
        calls.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.uuid.cmp(&b.uuid)));
        calls
    }

    pub fn get_call(&self, uuid: &str) -> Option<CallSession> {
        self.table.lock().active.get(uuid).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.table.lock().active.len()
    }

    /// Every orbit seen so far, by orbit number
    pub fn park_orbits(&self) -> Vec<ParkOrbit> {
        let mut orbits: Vec<ParkOrbit> = self.table.lock().orbits.values().cloned().collect();
        orbits.sort_by(|a, b| a.orbit_number.cmp(&b.orbit_number));
        orbits
    }
}

#[async_trait]
impl EventHandler for CallStateManager {
    async fn handle_event(&self, event: &EslEvent) {
        self.process_event(event).await;
    }
}
