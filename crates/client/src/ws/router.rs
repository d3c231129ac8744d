//! Routes decoded envelopes to the handlers subscribed to their type.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use alertdesk_shared::Envelope;
use serde_json::Value;

use super::lock;
use crate::error::ClientError;

/// Callback receiving the `data` of every envelope of one type.
///
/// Handlers run on the connection task and must not block.
pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Wrap a closure as a [`MessageHandler`]. Keep a clone to unsubscribe later.
pub fn handler<F>(f: F) -> MessageHandler
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Message-type to handler-list table.
#[derive(Default)]
pub struct MessageRouter {
    routes: Mutex<HashMap<String, Vec<MessageHandler>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`. Duplicates are kept.
    pub fn subscribe(&self, kind: impl Into<String>, handler: MessageHandler) {
        lock(&self.routes).entry(kind.into()).or_default().push(handler);
    }

    /// Remove the first registration of this exact handler for `kind`.
    pub fn unsubscribe(&self, kind: &str, handler: &MessageHandler) -> bool {
        let mut routes = lock(&self.routes);
        let Some(handlers) = routes.get_mut(kind) else {
            return false;
        };
        let Some(index) = handlers.iter().position(|h| Arc::ptr_eq(h, handler)) else {
            return false;
        };
        handlers.remove(index);
        if handlers.is_empty() {
            routes.remove(kind);
        }
        true
    }

    pub fn handler_count(&self, kind: &str) -> usize {
        lock(&self.routes).get(kind).map_or(0, Vec::len)
    }

    /// Invoke every handler for `envelope.kind` in registration order.
    ///
    /// The table is not locked while handlers run, so they may subscribe or
    /// unsubscribe; the change applies from the next dispatch. Panics are
    /// contained per handler and returned as errors.
    pub fn dispatch(&self, envelope: &Envelope) -> Vec<ClientError> {
        let handlers = match lock(&self.routes).get(&envelope.kind) {
            Some(handlers) => handlers.clone(),
            None => return Vec::new(),
        };

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&envelope.data))) {
                failures.push(ClientError::HandlerPanicked {
                    kind: envelope.kind.clone(),
                    reason: panic_message(panic.as_ref()),
                });
            }
        }
        failures
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str, data: Value) -> Envelope {
        Envelope {
            kind: kind.to_string(),
            data,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> MessageHandler {
        let log = log.clone();
        handler(move |data| log.lock().unwrap().push(format!("{tag}:{data}")))
    }

    #[test]
    fn dispatch_without_handlers_is_noop() {
        let router = MessageRouter::new();
        assert!(router.dispatch(&envelope("alert.new", json!(1))).is_empty());
        assert_eq!(router.handler_count("alert.new"), 0);
    }

    #[test]
    fn handlers_run_in_registration_order_with_duplicates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = MessageRouter::new();
        let a = recorder(&log, "a");
        let b = recorder(&log, "b");
        router.subscribe("alert.new", a.clone());
        router.subscribe("alert.new", b);
        router.subscribe("alert.new", a);
        router.subscribe("incident.updated", recorder(&log, "other"));

        router.dispatch(&envelope("alert.new", json!(7)));
        assert_eq!(*log.lock().unwrap(), vec!["a:7", "b:7", "a:7"]);
    }

    #[test]
    fn unsubscribe_removes_only_first_match_and_drops_empty_keys() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = MessageRouter::new();
        let a = recorder(&log, "a");
        router.subscribe("alert.new", a.clone());
        router.subscribe("alert.new", a.clone());

        assert!(router.unsubscribe("alert.new", &a));
        assert_eq!(router.handler_count("alert.new"), 1);
        assert!(router.unsubscribe("alert.new", &a));
        assert!(!lock(&router.routes).contains_key("alert.new"));

        router.dispatch(&envelope("alert.new", json!(null)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn unsubscribe_unknown_handler_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = MessageRouter::new();
        router.subscribe("alert.new", recorder(&log, "a"));

        assert!(!router.unsubscribe("alert.new", &recorder(&log, "a")));
        assert!(!router.unsubscribe("feedback.new", &recorder(&log, "a")));
        assert_eq!(router.handler_count("alert.new"), 1);
    }

    #[test]
    fn panicking_handler_does_not_block_later_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = MessageRouter::new();
        router.subscribe("alert.new", handler(|_| panic!("bad payload")));
        router.subscribe("alert.new", recorder(&log, "after"));

        let failures = router.dispatch(&envelope("alert.new", json!("x")));
        assert_eq!(
            failures,
            vec![ClientError::HandlerPanicked {
                kind: "alert.new".into(),
                reason: "bad payload".into(),
            }]
        );
        assert_eq!(*log.lock().unwrap(), vec![r#"after:"x""#]);
    }

    #[test]
    fn handler_may_unsubscribe_itself_during_dispatch() {
        let router = Arc::new(MessageRouter::new());
        let calls = Arc::new(Mutex::new(0));
        let slot: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));

        let once = {
            let router = router.clone();
            let calls = calls.clone();
            let slot = slot.clone();
            handler(move |_| {
                *calls.lock().unwrap() += 1;
                if let Some(me) = slot.lock().unwrap().take() {
                    router.unsubscribe("alert.new", &me);
                }
            })
        };
        *slot.lock().unwrap() = Some(once.clone());
        router.subscribe("alert.new", once);

        router.dispatch(&envelope("alert.new", json!(1)));
        router.dispatch(&envelope("alert.new", json!(2)));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
