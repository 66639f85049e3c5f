//! Event bus: synchronous publish/subscribe for cross-widget signalling.
//!
//! The bus is an explicitly constructed service. Clone the handle to share it; every clone
//! talks to the same listener list. Tests build a fresh bus per case.
//!
//! Dispatch snapshots the listener list before fan-out, so listeners may subscribe,
//! unsubscribe or dispatch again from inside a callback. Nested dispatch is capped at
//! [`MAX_DISPATCH_DEPTH`] per thread; deeper messages are dropped with a warning.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{error, warn};

/// Address that every listener should treat as "for me".
pub const BROADCAST: &str = "*";

/// Address of the window controller.
pub const CONTROLLER: &str = "controller";

/// Message type asking the controller to open (or re-open) a widget.
pub const SPAWN: &str = "SPAWN";

/// Broadcast by the controller after a window is removed.
pub const WINDOW_CLOSED: &str = "WINDOW_CLOSED";

/// Asks a widget to run one of its declared tools. Payload: `{tool, args}`.
pub const TOOL_CALL: &str = "TOOL_CALL";

/// Maximum nesting of `dispatch` calls on one thread.
pub const MAX_DISPATCH_DEPTH: usize = 8;

/// A message on the bus. `to` is a subsystem id or [`BROADCAST`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl BusMessage {
    pub fn new(to: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            to: to.into(),
            kind: kind.into(),
            payload,
            from: None,
        }
    }

    pub fn broadcast(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(BROADCAST, kind, payload)
    }

    /// Convenience for the one message every peer is allowed to send the controller.
    pub fn spawn(widget_type: &str, props: serde_json::Value) -> Self {
        Self::new(
            CONTROLLER,
            SPAWN,
            serde_json::json!({ "widgetType": widget_type, "props": props }),
        )
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// True when the message is addressed to `target` directly or broadcast.
    pub fn is_for(&self, target: &str) -> bool {
        self.to == target || self.to == BROADCAST
    }
}

type Listener = Arc<dyn Fn(&BusMessage) + Send + Sync>;

struct BusInner {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Option<Self> {
        DISPATCH_DEPTH.with(|d| {
            if d.get() >= MAX_DISPATCH_DEPTH {
                None
            } else {
                d.set(d.get() + 1);
                Some(DepthGuard)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DISPATCH_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Process-wide publish/subscribe channel.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a listener. The returned handle removes exactly this listener.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Calls every currently subscribed listener with `message`, in subscription order.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners still run.
    /// Returns how many listeners completed normally.
    pub fn dispatch(&self, message: &BusMessage) -> usize {
        let Some(_depth) = DepthGuard::enter() else {
            warn!(
                to = %message.to,
                kind = %message.kind,
                "bus dispatch nested too deeply; message dropped"
            );
            return 0;
        };

        let snapshot: Vec<(u64, Listener)> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(message))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    listener = id,
                    kind = %message.kind,
                    "bus listener panicked; continuing with remaining listeners"
                ),
            }
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    /// Drops every listener. Intended for teardown between tests.
    pub fn reset(&self) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<BusInner>,
    id: u64,
}

impl Subscription {
    /// Removes the listener. Returns false if it was already gone (or the bus was dropped).
    pub fn unsubscribe(&self) -> bool {
        let Some(inner) = self.bus.upgrade() else {
            return false;
        };
        let mut guard = inner
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = guard.len();
        guard.retain(|(id, _)| *id != self.id);
        guard.len() != before
    }
}
