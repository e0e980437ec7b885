//! Classifies inbound frames and hands them to the right consumer.
//!
//! Order of checks for one frame:
//! 1. `login_failure` is fatal and returned to the session.
//! 2. `online_users` replaces the online-user snapshot (and keeps going).
//! 3. Echoes of our own sends resolve a pending slot and stop there.
//! 4. Everything else runs the handler registered for its type, then the
//!    generic callback, in one spawned task so the read loop never waits on
//!    user code.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use super::correlator::Correlator;
use super::protocol::{kinds, InboundEvent};

/// Callback for inbound events.
pub type EventHandler = Arc<dyn Fn(InboundEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn event_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(InboundEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// What [`EventRouter::route`] did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Server rejected our login; the session must stop.
    Fatal,
    /// An echo; `matched` is false when no send was waiting for it.
    Echo { matched: bool },
    /// Handed to the type handler and/or generic callback.
    Dispatched { kind: String, handled: bool },
    /// Not valid JSON; discarded.
    Dropped,
}

/// Handler table, generic callback, online-user snapshot and pending sends.
pub struct EventRouter {
    handlers: RwLock<HashMap<String, EventHandler>>,
    generic: RwLock<Option<EventHandler>>,
    online_users: RwLock<Vec<String>>,
    correlator: Correlator,
}

impl EventRouter {
    pub fn new(correlator: Correlator) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            generic: RwLock::new(None),
            online_users: RwLock::new(Vec::new()),
            correlator,
        }
    }

    /// Register `handler` for every type in `kinds`, replacing earlier ones.
    pub fn on(&self, kinds: &[&str], handler: EventHandler) {
        if let Ok(mut table) = self.handlers.write() {
            for kind in kinds {
                table.insert((*kind).to_string(), Arc::clone(&handler));
            }
        }
    }

    pub fn handler(&self, kind: &str) -> Option<EventHandler> {
        self.handlers.read().ok()?.get(kind).cloned()
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers
            .read()
            .map(|t| t.contains_key(kind))
            .unwrap_or(false)
    }

    /// Replace the fallback callback that sees every non-echo event.
    pub fn set_generic(&self, callback: Option<EventHandler>) {
        if let Ok(mut generic) = self.generic.write() {
            *generic = callback;
        }
    }

    pub fn online_users(&self) -> Vec<String> {
        self.online_users
            .read()
            .map(|u| u.clone())
            .unwrap_or_default()
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    /// Route one raw text frame.
    pub fn route(&self, raw: &str) -> Routed {
        let event = match InboundEvent::parse(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return Routed::Dropped;
            }
        };

        if event.kind == kinds::LOGIN_FAILURE {
            return Routed::Fatal;
        }

        if event.kind == kinds::ONLINE_USERS {
            if let Ok(mut users) = self.online_users.write() {
                *users = event.users.clone().unwrap_or_default();
            }
        }

        if event.self_send {
            let matched = self.correlator.resolve(event);
            return Routed::Echo { matched };
        }

        let kind = event.kind.clone();
        let typed = self.handler(&kind);
        let generic = self.generic.read().ok().and_then(|g| g.clone());
        let handled = typed.is_some();
        debug!(kind = %kind, handled, "dispatching event");

        if typed.is_some() || generic.is_some() {
            tokio::spawn(async move {
                if let Some(h) = typed {
                    h(event.clone()).await;
                }
                if let Some(g) = generic {
                    g(event).await;
                }
            });
        }

        Routed::Dispatched { kind, handled }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CorrelationMode;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    fn router() -> EventRouter {
        EventRouter::new(Correlator::new(CorrelationMode::Keyed))
    }

    #[tokio::test]
    async fn login_failure_is_fatal() {
        assert_eq!(router().route(r#"{"type":"login_failure"}"#), Routed::Fatal);
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped() {
        assert_eq!(router().route("]]"), Routed::Dropped);
    }

    #[tokio::test]
    async fn online_users_replaces_snapshot() {
        let r = router();
        r.route(r#"{"type":"online_users","users":["a","b"]}"#);
        assert_eq!(r.online_users(), vec!["a", "b"]);
        r.route(r#"{"type":"online_users","users":["c"]}"#);
        assert_eq!(r.online_users(), vec!["c"]);
    }

    #[tokio::test]
    async fn echo_resolves_pending_and_skips_handlers() {
        let r = router();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        r.set_generic(Some(event_handler(move |ev: InboundEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ev.kind);
            }
        })));

        let slot = r.correlator().register();
        let routed = r.route(r#"{"type":"message","text":"me","selfSend":true}"#);
        assert_eq!(routed, Routed::Echo { matched: true });
        assert_eq!(slot.wait(None).await.unwrap().text.as_deref(), Some("me"));

        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "generic callback must not see echoes");
    }

    #[tokio::test]
    async fn echo_with_scalar_reply_to_still_resolves() {
        let r = router();
        let slot = r.correlator().register();
        let routed = r.route(
            r#"{"type":"message_reply","text":7,"username":"bot","replyTo":"m-0","selfSend":true}"#,
        );
        assert_eq!(routed, Routed::Echo { matched: true });
        let echo = slot.wait(None).await.unwrap();
        assert_eq!(echo.text.as_deref(), Some("7"));
        assert!(echo.reply_to.is_none());
    }

    #[tokio::test]
    async fn unmatched_echo_is_silently_dropped() {
        let r = router();
        assert_eq!(
            r.route(r#"{"type":"message","selfSend":true}"#),
            Routed::Echo { matched: false }
        );
    }

    #[tokio::test]
    async fn typed_handler_runs_before_generic() {
        let r = router();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();

        let o = Arc::clone(&order);
        r.on(
            &["message", "message_reply"],
            event_handler(move |_ev| {
                let o = Arc::clone(&o);
                async move {
                    tokio::task::yield_now().await;
                    o.lock().unwrap().push("typed");
                }
            }),
        );
        let o = Arc::clone(&order);
        r.set_generic(Some(event_handler(move |_ev| {
            let o = Arc::clone(&o);
            let done = done_tx.clone();
            async move {
                o.lock().unwrap().push("generic");
                let _ = done.send(());
            }
        })));

        let routed = r.route(r#"{"type":"message_reply","text":"x","username":"u"}"#);
        assert_eq!(
            routed,
            Routed::Dispatched {
                kind: "message_reply".into(),
                handled: true
            }
        );
        done_rx.recv().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["typed", "generic"]);
    }

    #[tokio::test]
    async fn unregistered_type_reaches_only_generic() {
        let r = router();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        r.set_generic(Some(event_handler(move |ev: InboundEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ev.kind);
            }
        })));
        let routed = r.route(r#"{"type":"typing","username":"u"}"#);
        assert_eq!(
            routed,
            Routed::Dispatched {
                kind: "typing".into(),
                handled: false
            }
        );
        assert_eq!(rx.recv().await.as_deref(), Some("typing"));
    }

    #[test]
    fn on_registers_one_handler_for_many_types() {
        let r = router();
        r.on(&["a", "b"], event_handler(|_ev| async {}));
        assert!(r.has_handler("a"));
        assert!(r.has_handler("b"));
        assert!(!r.has_handler("c"));
    }
}
