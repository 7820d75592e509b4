//! Page target registry: agent-issued page handles and what they point at.
//!
//! Intentionally a thin lookup table with no automation logic, so the
//! automation session and tools can be tested without a real debugging
//! connection. Records live in process memory only and are evicted when
//! their owning tab is torn down.

use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PageBackend {
    /// Page rendered inside an embedded view of a desktop host window.
    DesktopView,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTargetRecord {
    pub page_target_id: String,
    /// Owning conversation context.
    pub tab_id: String,
    pub url: String,
    pub backend: PageBackend,
    pub client_id: String,
    /// Unset until the desktop runtime confirms the concrete target.
    /// A record without it is not actionable.
    pub debug_target_id: Option<String>,
    pub view_id: Option<String>,
    pub created_at_ms: i64,
}

impl PageTargetRecord {
    pub fn is_actionable(&self) -> bool {
        self.debug_target_id.is_some()
    }
}

/// Partial fields merged in once the runtime responds.
#[derive(Debug, Clone, Default)]
pub struct RuntimeInfoUpdate {
    pub debug_target_id: Option<String>,
    pub view_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct PageTargetRegistry {
    records: HashMap<String, PageTargetRecord>,
}

impl PageTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, record: PageTargetRecord) {
        self.records.insert(record.page_target_id.clone(), record);
    }

    pub fn get(&self, page_target_id: &str) -> Option<PageTargetRecord> {
        self.records.get(page_target_id).cloned()
    }

    pub fn update_url(&mut self, page_target_id: &str, url: String) -> bool {
        match self.records.get_mut(page_target_id) {
            Some(record) => {
                record.url = url;
                true
            }
            None => false,
        }
    }

    /// Merge runtime-confirmed fields; `None` fields are left untouched.
    pub fn update_runtime_info(&mut self, page_target_id: &str, update: RuntimeInfoUpdate) -> bool {
        match self.records.get_mut(page_target_id) {
            Some(record) => {
                if let Some(target_id) = update.debug_target_id {
                    record.debug_target_id = Some(target_id);
                }
                if let Some(view_id) = update.view_id {
                    record.view_id = Some(view_id);
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, page_target_id: &str) -> Option<PageTargetRecord> {
        self.records.remove(page_target_id)
    }

    /// Evict every record owned by a conversation tab. Returns the removed
    /// page handles so callers can purge the matching record stores.
    pub fn remove_tab(&mut self, tab_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .records
            .values()
            .filter(|r| r.tab_id == tab_id)
            .map(|r| r.page_target_id.clone())
            .collect();
        for id in &ids {
            self.records.remove(id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(page: &str, tab: &str) -> PageTargetRecord {
        PageTargetRecord {
            page_target_id: page.into(),
            tab_id: tab.into(),
            url: "https://example.com".into(),
            backend: PageBackend::DesktopView,
            client_id: "c1".into(),
            debug_target_id: None,
            view_id: None,
            created_at_ms: 0,
        }
    }

    #[test]
    fn fresh_record_is_not_actionable() {
        let mut registry = PageTargetRegistry::new();
        registry.register(record("p1", "t1"));
        assert!(!registry.get("p1").unwrap().is_actionable());

        registry.update_runtime_info(
            "p1",
            RuntimeInfoUpdate {
                debug_target_id: Some("TARGET1".into()),
                view_id: Some("v1".into()),
            },
        );
        let updated = registry.get("p1").unwrap();
        assert!(updated.is_actionable());
        assert_eq!(updated.view_id.as_deref(), Some("v1"));
    }

    #[test]
    fn runtime_info_merge_is_partial() {
        let mut registry = PageTargetRegistry::new();
        registry.register(record("p1", "t1"));
        registry.update_runtime_info(
            "p1",
            RuntimeInfoUpdate {
                debug_target_id: Some("TARGET1".into()),
                view_id: None,
            },
        );
        // A later update with only a view id must not clear the target id.
        registry.update_runtime_info(
            "p1",
            RuntimeInfoUpdate {
                debug_target_id: None,
                view_id: Some("v1".into()),
            },
        );
        let r = registry.get("p1").unwrap();
        assert_eq!(r.debug_target_id.as_deref(), Some("TARGET1"));
        assert_eq!(r.view_id.as_deref(), Some("v1"));
    }

    #[test]
    fn tab_teardown_evicts_only_owned_records() {
        let mut registry = PageTargetRegistry::new();
        registry.register(record("p1", "t1"));
        registry.register(record("p2", "t1"));
        registry.register(record("p3", "t2"));

        let mut removed = registry.remove_tab("t1");
        removed.sort();
        assert_eq!(removed, vec!["p1".to_string(), "p2".to_string()]);
        assert!(registry.get("p3").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn update_url_mutates_in_place() {
        let mut registry = PageTargetRegistry::new();
        registry.register(record("p1", "t1"));
        assert!(registry.update_url("p1", "https://example.com/next".into()));
        assert_eq!(registry.get("p1").unwrap().url, "https://example.com/next");
        assert!(!registry.update_url("missing", "x".into()));
    }
}
