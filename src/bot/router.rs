// Inbound event router: one typed callback per event name
//
// Dispatch clones the callback handle under the read lock and releases the
// lock before invoking it, so a callback may (re)register callbacks itself.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::RouterError;
use super::types::{EventMsg, EventName, FriendMsg, GroupMsg, InboundEvent, InboundNotification};
use crate::{ulog_debug, ulog_warn};

type ErasedCallback = Arc<dyn Fn(i64, &Value) + Send + Sync>;

pub struct EventRouter {
    account_id: i64,
    callbacks: RwLock<HashMap<EventName, ErasedCallback>>,
}

/// Payload type each event is declared with (runtime view of `InboundEvent`)
fn declared_payload(event: EventName) -> (TypeId, &'static str) {
    match event {
        EventName::GroupMessage => (TypeId::of::<GroupMsg>(), type_name::<GroupMsg>()),
        EventName::FriendMessage => (TypeId::of::<FriendMsg>(), type_name::<FriendMsg>()),
        EventName::GenericEvent => (TypeId::of::<EventMsg>(), type_name::<EventMsg>()),
    }
}

fn erase<P, F>(event: EventName, callback: F) -> ErasedCallback
where
    P: DeserializeOwned + 'static,
    F: Fn(i64, P) + Send + Sync + 'static,
{
    Arc::new(move |account_id: i64, raw: &Value| {
        match P::deserialize(raw) {
            Ok(payload) => callback(account_id, payload),
            Err(e) => {
                ulog_warn!("[opq-router] Malformed {} payload: {}", event, e);
            }
        }
    })
}

impl EventRouter {
    pub fn new(account_id: i64) -> Self {
        Self {
            account_id,
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EventName, ErasedCallback>> {
        self.callbacks
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EventName, ErasedCallback>> {
        self.callbacks
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the callback for `E`, replacing any previous one.
    pub fn on<E, F>(&self, callback: F)
    where
        E: InboundEvent,
        F: Fn(i64, E::Payload) + Send + Sync + 'static,
    {
        let erased = erase::<E::Payload, F>(E::NAME, callback);
        self.write().insert(E::NAME, erased);
    }

    /// Name-keyed registration for callers that pick events at runtime.
    /// The payload type `P` must be the one declared for `event_name`.
    pub fn register<P, F>(&self, event_name: &str, callback: F) -> Result<(), RouterError>
    where
        P: DeserializeOwned + 'static,
        F: Fn(i64, P) + Send + Sync + 'static,
    {
        let event = EventName::from_wire(event_name)
            .ok_or_else(|| RouterError::UnknownEvent(event_name.to_string()))?;

        let (expected_id, expected) = declared_payload(event);
        if TypeId::of::<P>() != expected_id {
            return Err(RouterError::SignatureMismatch {
                event: event.wire_name(),
                expected,
                found: type_name::<P>(),
            });
        }

        let erased = erase::<P, F>(event, callback);
        self.write().insert(event, erased);
        Ok(())
    }

    pub fn is_registered(&self, event: EventName) -> bool {
        self.read().contains_key(&event)
    }

    /// Invoke the matching callback. Returns whether one ran.
    pub fn dispatch(&self, notification: &InboundNotification) -> bool {
        if notification.account_id != self.account_id {
            return false;
        }

        let callback = match self.read().get(&notification.event) {
            Some(cb) => Arc::clone(cb),
            None => {
                ulog_debug!("[opq-router] No callback for {}", notification.event);
                return false;
            }
        };

        callback(notification.account_id, &notification.payload);
        true
    }
}
