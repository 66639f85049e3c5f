//! Candidate ranking for the reflection step.
//!
//! Advisory only: the controller will spawn any registered widget type whether or not it
//! was offered here. Selection just bounds what gets proposed to the LLM.

use crate::registry::{WidgetManifest, WidgetRegistry};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub const ACTIVE_SET_CAPACITY: usize = 5;
pub const DEFAULT_LIMIT: usize = 3;
/// Flat score bonus for widget types in the active set.
pub const ACTIVE_BONUS: u32 = 30;

/// Bounded recency set of widget-type ids, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSet {
    ids: VecDeque<String>,
    capacity: usize,
}

impl Default for ActiveSet {
    fn default() -> Self {
        Self::with_capacity(ACTIVE_SET_CAPACITY)
    }
}

impl ActiveSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records a use. A repeat use moves the id to the newest slot; overflow evicts the oldest.
    pub fn mark_used(&mut self, id: &str) {
        if let Some(pos) = self.ids.iter().position(|existing| existing == id) {
            self.ids.remove(pos);
        }
        self.ids.push_back(id.to_string());
        while self.ids.len() > self.capacity {
            if let Some(evicted) = self.ids.pop_front() {
                debug!(widget_type = %evicted, "evicted from active set");
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|existing| existing == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// Options for [`SelectionEngine::select`].
#[derive(Debug, Clone)]
pub struct SelectOptions {
    pub limit: usize,
    /// Overrides the engine's own active set when present.
    pub active_set: Option<ActiveSet>,
    pub category: Option<String>,
    pub min_priority: Option<u8>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            active_set: None,
            category: None,
            min_priority: None,
        }
    }
}

/// One ranked candidate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredWidget {
    pub id: String,
    pub score: u32,
    pub active: bool,
    #[serde(skip)]
    pub manifest: Arc<WidgetManifest>,
}

/// Ranks registry entries against free text and recency.
#[derive(Debug)]
pub struct SelectionEngine {
    registry: Arc<WidgetRegistry>,
    active: RwLock<ActiveSet>,
}

impl SelectionEngine {
    pub fn new(registry: Arc<WidgetRegistry>) -> Self {
        Self::with_capacity(registry, ACTIVE_SET_CAPACITY)
    }

    pub fn with_capacity(registry: Arc<WidgetRegistry>, capacity: usize) -> Self {
        Self {
            registry,
            active: RwLock::new(ActiveSet::with_capacity(capacity)),
        }
    }

    pub fn mark_used(&self, id: &str) {
        self.active
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .mark_used(id);
    }

    pub fn active_set(&self) -> ActiveSet {
        self.active
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Keyword search, then `priority (+ ACTIVE_BONUS if recently used)`, highest first.
    /// Equal scores keep registry order.
    pub fn select(&self, query: &str, options: SelectOptions) -> Vec<ScoredWidget> {
        let active = options.active_set.unwrap_or_else(|| self.active_set());
        let candidates =
            self.registry
                .search(query, options.category.as_deref(), options.min_priority);

        let mut scored: Vec<ScoredWidget> = candidates
            .into_iter()
            .map(|manifest| {
                let is_active = active.contains(&manifest.id);
                let score = manifest.priority() as u32 + if is_active { ACTIVE_BONUS } else { 0 };
                ScoredWidget {
                    id: manifest.id.clone(),
                    score,
                    active: is_active,
                    manifest,
                }
            })
            .collect();
        // sort_by is stable
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored.truncate(options.limit);
        debug!(
            query = %query,
            picked = ?scored.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "widget selection"
        );
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WidgetMeta;

    fn engine() -> SelectionEngine {
        let reg = WidgetRegistry::new();
        reg.register(
            WidgetManifest::new("weather", WidgetMeta::new("Weather", "☀", "Forecast"))
                .with_discovery(&["weather", "today"], Some("info"), Some(40)),
        )
        .unwrap();
        reg.register(
            WidgetManifest::new("news", WidgetMeta::new("News", "📰", "Headlines"))
                .with_discovery(&["news", "today"], Some("info"), Some(90)),
        )
        .unwrap();
        reg.register(
            WidgetManifest::new("timer", WidgetMeta::new("Timer", "⏱", "Countdown"))
                .with_discovery(&["timer", "today"], Some("tools"), None),
        )
        .unwrap();
        SelectionEngine::new(Arc::new(reg))
    }

    #[test]
    fn active_set_is_bounded_fifo() {
        let mut set = ActiveSet::default();
        for id in ["a", "b", "c", "d", "e", "f"] {
            set.mark_used(id);
        }
        assert_eq!(set.ids(), vec!["b", "c", "d", "e", "f"]);
        set.mark_used("b");
        set.mark_used("g");
        assert_eq!(set.ids(), vec!["d", "e", "f", "b", "g"]);
    }

    #[test]
    fn priority_beats_active_bonus() {
        let engine = engine();
        engine.mark_used("weather");
        let picked = engine.select("what's on today", SelectOptions::default());
        let scores: Vec<(&str, u32)> = picked.iter().map(|s| (s.id.as_str(), s.score)).collect();
        assert_eq!(scores, vec![("news", 90), ("weather", 70), ("timer", 50)]);
    }

    #[test]
    fn active_bonus_and_limit_apply() {
        let engine = engine();
        let mut active = ActiveSet::default();
        active.mark_used("timer");
        let picked = engine.select(
            "today",
            SelectOptions {
                limit: 2,
                active_set: Some(active),
                ..Default::default()
            },
        );
        let ids: Vec<&str> = picked.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["news", "timer"]);
    }

    #[test]
    fn category_and_priority_filters() {
        let engine = engine();
        let picked = engine.select(
            "today",
            SelectOptions {
                category: Some("info".into()),
                min_priority: Some(50),
                ..Default::default()
            },
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "news");
    }
}
