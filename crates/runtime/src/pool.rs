//! Pure per-window view pool state.
//!
//! Decides what an `upsert` actually has to do (create, navigate, move)
//! without touching the engine, so the idempotence rules are unit-testable.
//! The key rule: a navigation is issued if and only if the resolved URL
//! differs from the last one this manager itself requested. In-page
//! navigation by the user never updates that field, so a polling caller
//! repeating the same URL cannot clobber it.

use std::collections::HashMap;

use deskbridge_core::protocol::Bounds;

#[derive(Debug, Clone)]
pub struct ViewEntry {
    pub view_id: String,
    pub key: String,
    pub window_id: String,
    /// Last URL this manager itself asked the view to load.
    pub last_requested_url: Option<String>,
    pub bounds: Option<Bounds>,
    pub visible: bool,
    pub debug_target_id: Option<String>,
    /// The fixed per-view feature set (shortcut bridge, popup handling,
    /// status emitter) is installed once, on creation.
    pub features_installed: bool,
}

/// What the caller of `upsert` must now perform against the engine/host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub view_id: String,
    pub created: bool,
    /// Resolved URL to navigate to, when a navigation is due.
    pub navigate: Option<String>,
    pub bounds_changed: bool,
    pub visibility_changed: bool,
}

#[derive(Debug, Default)]
pub struct ViewPool {
    windows: HashMap<String, HashMap<String, ViewEntry>>,
    next_view: u64,
}

impl ViewPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent create-or-update. `resolved_url` must already be
    /// normalized by the caller.
    pub fn upsert(
        &mut self,
        window_id: &str,
        key: &str,
        resolved_url: &str,
        bounds: Option<Bounds>,
        visible: bool,
    ) -> UpsertOutcome {
        let views = self.windows.entry(window_id.to_string()).or_default();

        if let Some(entry) = views.get_mut(key) {
            let navigate = if entry.last_requested_url.as_deref() != Some(resolved_url) {
                entry.last_requested_url = Some(resolved_url.to_string());
                Some(resolved_url.to_string())
            } else {
                None
            };
            let bounds_changed = bounds.is_some() && entry.bounds != bounds;
            if bounds_changed {
                entry.bounds = bounds;
            }
            let visibility_changed = entry.visible != visible;
            entry.visible = visible;
            return UpsertOutcome {
                view_id: entry.view_id.clone(),
                created: false,
                navigate,
                bounds_changed,
                visibility_changed,
            };
        }

        self.next_view += 1;
        let view_id = format!("view-{}", self.next_view);
        views.insert(
            key.to_string(),
            ViewEntry {
                view_id: view_id.clone(),
                key: key.to_string(),
                window_id: window_id.to_string(),
                last_requested_url: Some(resolved_url.to_string()),
                bounds,
                visible,
                debug_target_id: None,
                features_installed: false,
            },
        );
        UpsertOutcome {
            view_id,
            created: true,
            navigate: Some(resolved_url.to_string()),
            bounds_changed: bounds.is_some(),
            visibility_changed: false,
        }
    }

    pub fn get(&self, window_id: &str, key: &str) -> Option<&ViewEntry> {
        self.windows.get(window_id).and_then(|views| views.get(key))
    }

    pub fn set_debug_target(&mut self, window_id: &str, key: &str, target_id: String) -> bool {
        match self
            .windows
            .get_mut(window_id)
            .and_then(|views| views.get_mut(key))
        {
            Some(entry) => {
                entry.debug_target_id = Some(target_id);
                true
            }
            None => false,
        }
    }

    pub fn mark_features_installed(&mut self, window_id: &str, key: &str) -> bool {
        match self
            .windows
            .get_mut(window_id)
            .and_then(|views| views.get_mut(key))
        {
            Some(entry) => {
                entry.features_installed = true;
                true
            }
            None => false,
        }
    }

    pub fn destroy(&mut self, window_id: &str, key: &str) -> Option<ViewEntry> {
        let views = self.windows.get_mut(window_id)?;
        let removed = views.remove(key);
        if views.is_empty() {
            self.windows.remove(window_id);
        }
        removed
    }

    /// Remove every view in a window. Iterates a snapshot of keys, never
    /// the live collection.
    pub fn destroy_all(&mut self, window_id: &str) -> Vec<ViewEntry> {
        let keys: Vec<String> = match self.windows.get(window_id) {
            Some(views) => views.keys().cloned().collect(),
            None => return Vec::new(),
        };
        keys.into_iter()
            .filter_map(|key| self.destroy(window_id, &key))
            .collect()
    }

    /// Snapshot of the keys currently in a window, for mutation-safe
    /// iteration.
    pub fn snapshot_keys(&self, window_id: &str) -> Vec<String> {
        self.windows
            .get(window_id)
            .map(|views| views.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, window_id: &str) -> usize {
        self.windows.get(window_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(w: u32, h: u32) -> Bounds {
        Bounds {
            x: 0,
            y: 0,
            width: w,
            height: h,
        }
    }

    #[test]
    fn first_upsert_creates_and_navigates() {
        let mut pool = ViewPool::new();
        let outcome = pool.upsert("w1", "k", "https://example.com", Some(bounds(100, 100)), true);
        assert!(outcome.created);
        assert_eq!(outcome.navigate.as_deref(), Some("https://example.com"));
        assert_eq!(pool.count("w1"), 1);
    }

    #[test]
    fn repeated_upsert_with_same_url_only_updates_bounds() {
        let mut pool = ViewPool::new();
        pool.upsert("w1", "k", "https://example.com", Some(bounds(100, 100)), true);
        let second = pool.upsert("w1", "k", "https://example.com", Some(bounds(200, 200)), true);

        assert!(!second.created);
        assert_eq!(second.navigate, None);
        assert!(second.bounds_changed);
        assert_eq!(pool.count("w1"), 1);
    }

    #[test]
    fn exactly_one_navigation_across_a_polling_sequence() {
        let mut pool = ViewPool::new();
        let mut navigations = 0;
        for i in 0..5 {
            let outcome = pool.upsert(
                "w1",
                "k",
                "https://example.com",
                Some(bounds(100 + i, 100 + i)),
                true,
            );
            if outcome.navigate.is_some() {
                navigations += 1;
            }
        }
        assert_eq!(navigations, 1);
    }

    #[test]
    fn url_change_triggers_exactly_one_new_navigation() {
        let mut pool = ViewPool::new();
        pool.upsert("w1", "k", "https://example.com", None, true);
        let changed = pool.upsert("w1", "k", "https://example.com/next", None, true);
        assert_eq!(changed.navigate.as_deref(), Some("https://example.com/next"));
        let repeat = pool.upsert("w1", "k", "https://example.com/next", None, true);
        assert_eq!(repeat.navigate, None);
    }

    #[test]
    fn one_view_per_window_key_pair() {
        let mut pool = ViewPool::new();
        let a = pool.upsert("w1", "k", "https://example.com", None, true);
        let b = pool.upsert("w2", "k", "https://example.com", None, true);
        let c = pool.upsert("w1", "k", "https://example.com", None, true);
        assert_ne!(a.view_id, b.view_id);
        assert_eq!(a.view_id, c.view_id);
    }

    #[test]
    fn destroy_all_drains_the_window() {
        let mut pool = ViewPool::new();
        pool.upsert("w1", "a", "https://example.com", None, true);
        pool.upsert("w1", "b", "https://example.com", None, true);
        pool.upsert("w2", "c", "https://example.com", None, true);

        let destroyed = pool.destroy_all("w1");
        assert_eq!(destroyed.len(), 2);
        assert_eq!(pool.count("w1"), 0);
        assert_eq!(pool.count("w2"), 1);
    }

    #[test]
    fn hidden_view_toggles_visibility_flag() {
        let mut pool = ViewPool::new();
        pool.upsert("w1", "k", "https://example.com", None, true);
        let hidden = pool.upsert("w1", "k", "https://example.com", None, false);
        assert!(hidden.visibility_changed);
        assert!(!pool.get("w1", "k").unwrap().visible);
    }
}
