//! Workspace session: one controller, its bus, persistence and the chat loop around it.
//!
//! The session owns the debounced autosave task. Every controller change restarts the
//! quiet-period timer; the newest snapshot is written once the timer runs out.
//!
//! Chat turns are optimistic: the user message is recorded immediately under a fresh
//! correlation id, and the reflection reply is applied exactly once against that id.
//! A failed reflection call becomes a single apologetic assistant message.

use crate::bus::{BusMessage, EventBus, Subscription, TOOL_CALL, WINDOW_CLOSED};
use crate::config::WorkspaceConfig;
use crate::context::{fetch_context, format_context};
use crate::controller::{ChangeSubscription, WindowController};
use crate::error::{ReflectionError, StoreResult};
use crate::persistence::PersistenceGateway;
use crate::reflection::{
    Attachment, ChatRole, HistoryTurn, ReflectAction, ReflectionClient, ReflectionRequest,
};
use crate::registry::{WidgetManifest, WidgetRegistry};
use crate::selection::{SelectOptions, SelectionEngine};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collection holding each session's chat log.
pub const CHATS: &str = "chats";

/// Bus sender id used for actions coming out of the chat loop.
pub const CHAT: &str = "chat";

/// Shown when a turn can't be completed.
pub const FALLBACK_REPLY: &str =
    "Sorry, something went wrong while handling that. Please try again.";

/// Prior turns sent along with each reflection request.
const HISTORY_TURNS: usize = 20;

/// One chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    /// Shared by a user message and the replies that reconcile it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub created_at: i64,
}

impl ChatMessage {
    fn new(role: ChatRole, content: &str, correlation_id: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            correlation_id: Some(correlation_id.to_string()),
            attachment: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChatLog {
    messages: Vec<ChatMessage>,
    #[serde(skip)]
    pending: HashSet<String>,
}

/// What one chat turn produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub correlation_id: String,
    pub user: ChatMessage,
    pub replies: Vec<ChatMessage>,
    /// Widget types a `spawn_air` was issued for.
    pub spawned: Vec<String>,
    /// True when the fallback reply was used.
    pub failed: bool,
}

/// Builder for [`WorkspaceSession`].
pub struct SessionBuilder {
    session_id: String,
    registry: Arc<WidgetRegistry>,
    store: Arc<dyn PersistenceGateway>,
    reflector: Option<Arc<dyn ReflectionClient>>,
    config: WorkspaceConfig,
}

impl SessionBuilder {
    pub fn reflector(mut self, reflector: Arc<dyn ReflectionClient>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn config(mut self, config: WorkspaceConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads `{collection}/{session_id}` and starts autosave. A missing document opens a
    /// fresh workspace. Must be called inside a tokio runtime.
    pub async fn open(self) -> StoreResult<Arc<WorkspaceSession>> {
        let SessionBuilder {
            session_id,
            registry,
            store,
            reflector,
            config,
        } = self;

        let controller = Arc::new(WindowController::with_options(
            registry.clone(),
            config.controller_options(),
        ));
        let bus = EventBus::new();
        let mut bus_subscriptions = vec![controller.attach_bus(&bus)];

        let saved = store.get(&config.session_collection, &session_id).await?;
        controller.hydrate(saved.as_ref());

        let chat = match store.get(CHATS, &session_id).await {
            Ok(Some(doc)) => serde_json::from_value::<ChatLog>(doc).unwrap_or_else(|e| {
                warn!(session_id = %session_id, error = %e, "unreadable chat log; starting empty");
                ChatLog::default()
            }),
            Ok(None) => ChatLog::default(),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "chat log unavailable; starting empty");
                ChatLog::default()
            }
        };

        let popped_out: Arc<RwLock<HashSet<String>>> = Arc::default();
        let shadow = Arc::downgrade(&popped_out);
        bus_subscriptions.push(bus.subscribe(move |msg| {
            if msg.kind != WINDOW_CLOSED {
                return;
            }
            let (Some(set), Some(id)) = (shadow.upgrade(), msg.payload.get("id").and_then(|v| v.as_str())) else {
                return;
            };
            if set.write().unwrap_or_else(|p| p.into_inner()).remove(id) {
                debug!(window_id = %id, "popped-out attachment returned to chat");
            }
        }));

        let (tx, rx) = mpsc::unbounded_channel();
        let change_subscription = controller.subscribe(move |_| {
            let _ = tx.send(());
        });
        let autosave = tokio::spawn(autosave_loop(
            rx,
            controller.clone(),
            store.clone(),
            config.session_collection.clone(),
            session_id.clone(),
            config.autosave_debounce(),
        ));

        info!(
            session_id = %session_id,
            windows = controller.len(),
            messages = chat.messages.len(),
            "workspace session opened"
        );

        Ok(Arc::new(WorkspaceSession {
            session_id,
            selection: SelectionEngine::with_capacity(registry.clone(), config.active_set_capacity),
            registry,
            controller,
            bus,
            store,
            reflector,
            collection: config.session_collection,
            chat: RwLock::new(chat),
            popped_out,
            change_subscription,
            bus_subscriptions,
            autosave: Mutex::new(Some(autosave)),
        }))
    }
}

async fn persist(
    controller: &WindowController,
    store: &dyn PersistenceGateway,
    collection: &str,
    session_id: &str,
) -> StoreResult<()> {
    let snapshot = controller.serialize_json();
    store.set(collection, session_id, snapshot).await?;
    debug!(session_id = %session_id, "workspace persisted");
    Ok(())
}

async fn autosave_loop(
    mut changes: mpsc::UnboundedReceiver<()>,
    controller: Arc<WindowController>,
    store: Arc<dyn PersistenceGateway>,
    collection: String,
    session_id: String,
    debounce: Duration,
) {
    while changes.recv().await.is_some() {
        // restart the quiet period on every further change
        loop {
            match tokio::time::timeout(debounce, changes.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) | Err(_) => break,
            }
        }
        if let Err(e) = persist(&controller, store.as_ref(), &collection, &session_id).await {
            error!(session_id = %session_id, error = %e, "workspace autosave failed");
        }
    }
    debug!(session_id = %session_id, "autosave task stopped");
}

/// A live workspace: controller, bus, selection, persistence and chat.
pub struct WorkspaceSession {
    session_id: String,
    registry: Arc<WidgetRegistry>,
    controller: Arc<WindowController>,
    bus: EventBus,
    selection: SelectionEngine,
    store: Arc<dyn PersistenceGateway>,
    reflector: Option<Arc<dyn ReflectionClient>>,
    collection: String,
    chat: RwLock<ChatLog>,
    popped_out: Arc<RwLock<HashSet<String>>>,
    change_subscription: ChangeSubscription,
    bus_subscriptions: Vec<Subscription>,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkspaceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceSession")
            .field("session_id", &self.session_id)
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl Drop for WorkspaceSession {
    fn drop(&mut self) {
        // closes the change channel so the autosave task winds down
        self.change_subscription.unsubscribe();
    }
}

impl WorkspaceSession {
    pub fn builder(
        session_id: &str,
        registry: Arc<WidgetRegistry>,
        store: Arc<dyn PersistenceGateway>,
    ) -> SessionBuilder {
        SessionBuilder {
            session_id: session_id.to_string(),
            registry,
            store,
            reflector: None,
            config: WorkspaceConfig::default(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn controller(&self) -> &Arc<WindowController> {
        &self.controller
    }

    pub fn registry(&self) -> &Arc<WidgetRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn selection(&self) -> &SelectionEngine {
        &self.selection
    }

    /// Asks the controller to open a widget through the bus, the same way chat does.
    pub fn request_spawn(&self, widget_type: &str, props: serde_json::Value, instance_id: Option<&str>) {
        let mut message = BusMessage::spawn(widget_type, props).with_from(CHAT);
        if let Some(id) = instance_id {
            message.payload["instanceId"] = serde_json::Value::String(id.to_string());
        }
        self.bus.dispatch(&message);
        if self.registry.contains(widget_type) {
            self.selection.mark_used(widget_type);
        }
    }

    /// Writes the current workspace now, bypassing the debounce.
    pub async fn flush(&self) -> StoreResult<()> {
        persist(&self.controller, self.store.as_ref(), &self.collection, &self.session_id).await?;
        self.persist_chat().await
    }

    /// Stops autosave and writes the final state.
    pub async fn shutdown(&self) -> StoreResult<()> {
        self.change_subscription.unsubscribe();
        for sub in &self.bus_subscriptions {
            sub.unsubscribe();
        }
        let handle = self.autosave.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(session_id = %self.session_id, error = %e, "autosave task ended abnormally");
            }
        }
        self.flush().await?;
        info!(session_id = %self.session_id, "workspace session closed");
        Ok(())
    }

    async fn persist_chat(&self) -> StoreResult<()> {
        let doc = {
            let chat = self.chat.read().unwrap_or_else(|p| p.into_inner());
            serde_json::to_value(&*chat)?
        };
        self.store.set(CHATS, &self.session_id, doc).await
    }

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.chat
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .messages
            .clone()
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.chat
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .pending
            .contains(correlation_id)
    }

    /// Records the user message and marks its turn pending. Returns the message.
    pub fn begin_turn(&self, text: &str) -> ChatMessage {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let message = ChatMessage::new(ChatRole::User, text, &correlation_id);
        let mut chat = self.chat.write().unwrap_or_else(|p| p.into_inner());
        chat.messages.push(message.clone());
        chat.pending.insert(correlation_id);
        message
    }

    /// Runs one full chat turn: optimistic user message, reflection, one reconciliation.
    pub async fn send_message(&self, text: &str) -> TurnResult {
        let user = self.begin_turn(text);
        let correlation_id = user.correlation_id.clone().unwrap_or_default();
        let outcome = self.reflect(text, &user.id).await;
        let mut result = self
            .reconcile(&correlation_id, outcome)
            .unwrap_or_else(|| TurnResult {
                correlation_id: correlation_id.clone(),
                user: user.clone(),
                replies: Vec::new(),
                spawned: Vec::new(),
                failed: false,
            });
        result.user = user;
        if let Err(e) = self.persist_chat().await {
            error!(session_id = %self.session_id, error = %e, "chat log write failed");
        }
        result
    }

    async fn reflect(&self, text: &str, exclude_id: &str) -> Result<Vec<ReflectAction>, ReflectionError> {
        let reflector = self.reflector.clone().ok_or(ReflectionError::NotConfigured)?;
        let candidates = self.selection.select(text, SelectOptions::default());

        // state of what's offered plus what's already open
        let mut manifests: Vec<Arc<WidgetManifest>> = candidates.iter().map(|c| c.manifest.clone()).collect();
        for window in self.controller.windows_sorted_by_z() {
            if manifests.iter().all(|m| m.id != window.widget_type) {
                if let Some(m) = self.registry.get(&window.widget_type) {
                    manifests.push(m);
                }
            }
        }
        let context = format_context(&fetch_context(self.store.as_ref(), &manifests, &self.session_id).await);

        let history: Vec<HistoryTurn> = {
            let chat = self.chat.read().unwrap_or_else(|p| p.into_inner());
            let turns: Vec<HistoryTurn> = chat
                .messages
                .iter()
                .filter(|m| m.id != exclude_id && m.role != ChatRole::System)
                .map(|m| HistoryTurn {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect();
            let skip = turns.len().saturating_sub(HISTORY_TURNS);
            turns.into_iter().skip(skip).collect()
        };

        let request = ReflectionRequest {
            message: text.to_string(),
            history,
            candidates,
            context,
            language: self.controller.language(),
        };
        reflector.reflect(&request).await
    }

    /// Applies the result of a turn. Returns `None` if the turn was already reconciled or
    /// never started; a second reconciliation for the same id changes nothing.
    pub fn reconcile(
        &self,
        correlation_id: &str,
        outcome: Result<Vec<ReflectAction>, ReflectionError>,
    ) -> Option<TurnResult> {
        let user = {
            let mut chat = self.chat.write().unwrap_or_else(|p| p.into_inner());
            if !chat.pending.remove(correlation_id) {
                warn!(correlation_id = %correlation_id, "stale or duplicate reconciliation ignored");
                return None;
            }
            chat.messages
                .iter()
                .find(|m| m.role == ChatRole::User && m.correlation_id.as_deref() == Some(correlation_id))
                .cloned()?
        };

        let mut replies = Vec::new();
        let mut spawned = Vec::new();
        let failed = match outcome {
            Ok(actions) => {
                for action in actions {
                    self.apply_action(action, correlation_id, &mut replies, &mut spawned);
                }
                false
            }
            Err(e) => {
                error!(correlation_id = %correlation_id, error = %e, "reflection failed; sending fallback reply");
                replies.push(ChatMessage::new(ChatRole::Assistant, FALLBACK_REPLY, correlation_id));
                true
            }
        };

        if !replies.is_empty() {
            self.chat
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .messages
                .extend(replies.iter().cloned());
        }
        Some(TurnResult {
            correlation_id: correlation_id.to_string(),
            user,
            replies,
            spawned,
            failed,
        })
    }

    fn apply_action(
        &self,
        action: ReflectAction,
        correlation_id: &str,
        replies: &mut Vec<ChatMessage>,
        spawned: &mut Vec<String>,
    ) {
        match action {
            ReflectAction::SpawnAir {
                widget_type,
                props,
                instance_id,
            } => {
                self.request_spawn(&widget_type, props, instance_id.as_deref());
                spawned.push(widget_type);
            }
            ReflectAction::Message {
                content,
                mut attachment,
            } => {
                if let Some(a) = attachment.as_mut() {
                    if a.id.is_none() {
                        let simple = uuid::Uuid::new_v4().simple().to_string();
                        a.id = Some(format!("{}-{}", a.widget_type, &simple[..8]));
                    }
                }
                let mut reply = ChatMessage::new(ChatRole::Assistant, &content, correlation_id);
                reply.attachment = attachment;
                replies.push(reply);
            }
            ReflectAction::ToolCall { widget, tool, args } => {
                if !self.registry.contains(&widget) {
                    warn!(widget_type = %widget, tool = %tool, "tool call for unknown widget ignored");
                    return;
                }
                self.bus.dispatch(
                    &BusMessage::new(
                        widget.as_str(),
                        TOOL_CALL,
                        serde_json::json!({ "tool": tool, "args": args }),
                    )
                    .with_from(CHAT),
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Pop-out
    // -----------------------------------------------------------------------

    /// Opens a chat attachment as a window that keeps the attachment's instance id.
    pub fn pop_out(&self, attachment_id: &str) -> Option<String> {
        let attachment = self
            .chat_history()
            .into_iter()
            .filter_map(|m| m.attachment)
            .find(|a| a.id.as_deref() == Some(attachment_id));
        let Some(attachment) = attachment else {
            warn!(attachment_id = %attachment_id, "pop-out for unknown attachment ignored");
            return None;
        };
        self.request_spawn(&attachment.widget_type, attachment.props, Some(attachment_id));
        self.controller.window(attachment_id)?;
        self.popped_out
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(attachment_id.to_string());
        Some(attachment_id.to_string())
    }

    pub fn is_popped_out(&self, attachment_id: &str) -> bool {
        self.popped_out
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(attachment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryGateway;
    use crate::registry::WidgetMeta;
    use async_trait::async_trait;
    use serde_json::json;

    struct Scripted(Vec<ReflectAction>);

    #[async_trait]
    impl ReflectionClient for Scripted {
        async fn reflect(&self, _: &ReflectionRequest) -> Result<Vec<ReflectAction>, ReflectionError> {
            Ok(self.0.clone())
        }
    }

    fn registry() -> Arc<WidgetRegistry> {
        let reg = WidgetRegistry::new();
        reg.register(
            WidgetManifest::new("notes", WidgetMeta::new("Notes", "📝", "Notes"))
                .singleton()
                .with_discovery(&["note"], Some("productivity"), Some(70)),
        )
        .unwrap();
        reg.register(WidgetManifest::new("image-viewer", WidgetMeta::new("Image", "🖼", "Images")))
            .unwrap();
        Arc::new(reg)
    }

    #[tokio::test]
    async fn spawn_air_goes_through_the_bus() {
        let session = WorkspaceSession::builder("s1", registry(), Arc::new(MemoryGateway::new()))
            .reflector(Arc::new(Scripted(vec![ReflectAction::SpawnAir {
                widget_type: "notes".into(),
                props: json!({"text": "milk"}),
                instance_id: None,
            }])))
            .open()
            .await
            .unwrap();

        let result = session.send_message("note: milk").await;
        assert!(!result.failed);
        assert_eq!(result.spawned, vec!["notes"]);
        assert_eq!(session.controller().len(), 1);
        assert!(session.selection().active_set().contains("notes"));
        assert!(!session.is_pending(&result.correlation_id));
    }

    #[tokio::test]
    async fn missing_reflector_yields_single_fallback() {
        let session = WorkspaceSession::builder("s1", registry(), Arc::new(MemoryGateway::new()))
            .open()
            .await
            .unwrap();
        let result = session.send_message("hello").await;
        assert!(result.failed);
        assert_eq!(result.replies.len(), 1);
        assert_eq!(result.replies[0].content, FALLBACK_REPLY);
        assert_eq!(session.chat_history().len(), 2);
    }

    #[tokio::test]
    async fn reconcile_applies_once() {
        let session = WorkspaceSession::builder("s1", registry(), Arc::new(MemoryGateway::new()))
            .open()
            .await
            .unwrap();
        let user = session.begin_turn("hi");
        let cid = user.correlation_id.unwrap();
        assert!(session.is_pending(&cid));

        let reply = || Ok(vec![ReflectAction::Message { content: "hey".into(), attachment: None }]);
        assert!(session.reconcile(&cid, reply()).is_some());
        assert!(session.reconcile(&cid, reply()).is_none());
        assert_eq!(session.chat_history().len(), 2);
    }

    #[tokio::test]
    async fn pop_out_keeps_instance_id_and_close_clears_it() {
        let session = WorkspaceSession::builder("s1", registry(), Arc::new(MemoryGateway::new()))
            .reflector(Arc::new(Scripted(vec![ReflectAction::Message {
                content: "Here is the picture".into(),
                attachment: Some(Attachment {
                    id: Some("img-1".into()),
                    widget_type: "image-viewer".into(),
                    props: json!({"src": "blob://cat.png"}),
                }),
            }])))
            .open()
            .await
            .unwrap();

        session.send_message("show me a cat").await;
        assert_eq!(session.pop_out("img-1").as_deref(), Some("img-1"));
        assert!(session.is_popped_out("img-1"));
        assert_eq!(session.controller().window("img-1").unwrap().props["src"], "blob://cat.png");

        // a second pop-out reuses the same window
        session.pop_out("img-1");
        assert_eq!(session.controller().len(), 1);

        session.controller().close("img-1");
        assert!(!session.is_popped_out("img-1"));
        assert!(session.pop_out("nope").is_none());
    }
}
