//! Bounded, insertion-ordered record stores for page network and console
//! history. Pure data structures: callers own the locking.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// One network request observed on a page. Keyed by the protocol-native
/// request id; mutated in place as the response and completion arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub finished: bool,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    pub encoded_bytes: u64,
    pub at_ms: i64,
}

/// One console message or uncaught exception observed on a page.
/// Keyed by a locally assigned monotonically increasing id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleRecord {
    pub message_id: u64,
    pub level: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub at_ms: i64,
}

/// Fixed-capacity FIFO buffer: pushing at capacity evicts the oldest entry.
#[derive(Debug)]
struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug)]
struct PageRecords {
    network: BoundedBuffer<NetworkRecord>,
    console: BoundedBuffer<ConsoleRecord>,
    next_message_id: u64,
}

/// All record buffers, keyed by page handle.
#[derive(Debug)]
pub struct RecordStores {
    pages: HashMap<String, PageRecords>,
    network_capacity: usize,
    console_capacity: usize,
}

impl RecordStores {
    pub fn new(network_capacity: usize, console_capacity: usize) -> Self {
        Self {
            pages: HashMap::new(),
            network_capacity,
            console_capacity,
        }
    }

    fn page_mut(&mut self, page_target_id: &str) -> &mut PageRecords {
        let network_capacity = self.network_capacity;
        let console_capacity = self.console_capacity;
        self.pages
            .entry(page_target_id.to_string())
            .or_insert_with(|| PageRecords {
                network: BoundedBuffer::new(network_capacity),
                console: BoundedBuffer::new(console_capacity),
                next_message_id: 1,
            })
    }

    pub fn push_network(&mut self, page_target_id: &str, record: NetworkRecord) {
        self.page_mut(page_target_id).network.push(record);
    }

    /// Mutate an existing network record in place. Returns false when the
    /// record has already been evicted or was never seen.
    pub fn update_network<F>(&mut self, page_target_id: &str, request_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut NetworkRecord),
    {
        let Some(page) = self.pages.get_mut(page_target_id) else {
            return false;
        };
        match page
            .network
            .items
            .iter_mut()
            .find(|r| r.request_id == request_id)
        {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Append a console record, assigning its message id. Returns the id.
    pub fn push_console(
        &mut self,
        page_target_id: &str,
        level: String,
        text: String,
        source_url: Option<String>,
        line: Option<u32>,
        at_ms: i64,
    ) -> u64 {
        let page = self.page_mut(page_target_id);
        let message_id = page.next_message_id;
        page.next_message_id += 1;
        page.console.push(ConsoleRecord {
            message_id,
            level,
            text,
            source_url,
            line,
            at_ms,
        });
        message_id
    }

    /// Most recent network records, oldest first, at most `limit`.
    pub fn list_network(&self, page_target_id: &str, limit: usize) -> Vec<NetworkRecord> {
        match self.pages.get(page_target_id) {
            Some(page) => {
                let skip = page.network.len().saturating_sub(limit);
                page.network.items.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_network(&self, page_target_id: &str, request_id: &str) -> Option<NetworkRecord> {
        self.pages.get(page_target_id).and_then(|page| {
            page.network
                .items
                .iter()
                .find(|r| r.request_id == request_id)
                .cloned()
        })
    }

    pub fn list_console(&self, page_target_id: &str, limit: usize) -> Vec<ConsoleRecord> {
        match self.pages.get(page_target_id) {
            Some(page) => {
                let skip = page.console.len().saturating_sub(limit);
                page.console.items.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn get_console(&self, page_target_id: &str, message_id: u64) -> Option<ConsoleRecord> {
        self.pages.get(page_target_id).and_then(|page| {
            page.console
                .items
                .iter()
                .find(|r| r.message_id == message_id)
                .cloned()
        })
    }

    /// Drop all buffers for a page handle (page close / tab teardown).
    pub fn remove_page(&mut self, page_target_id: &str) {
        self.pages.remove(page_target_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(request_id: &str) -> NetworkRecord {
        NetworkRecord {
            request_id: request_id.into(),
            url: format!("https://example.com/{request_id}"),
            method: "GET".into(),
            resource_type: None,
            status: None,
            mime_type: None,
            finished: false,
            failed: false,
            error_text: None,
            encoded_bytes: 0,
            at_ms: 0,
        }
    }

    #[test]
    fn network_store_evicts_oldest_first() {
        let mut stores = RecordStores::new(3, 3);
        for i in 0..5 {
            stores.push_network("p1", net(&format!("r{i}")));
        }
        let listed = stores.list_network("p1", 10);
        assert_eq!(listed.len(), 3);
        let ids: Vec<_> = listed.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
    }

    #[test]
    fn console_ids_are_monotonic_per_page() {
        let mut stores = RecordStores::new(8, 2);
        let a = stores.push_console("p1", "log".into(), "one".into(), None, None, 0);
        let b = stores.push_console("p1", "log".into(), "two".into(), None, None, 0);
        let c = stores.push_console("p1", "log".into(), "three".into(), None, None, 0);
        assert!(a < b && b < c);

        // Capacity 2: the first entry is gone but ids keep climbing.
        assert!(stores.get_console("p1", a).is_none());
        assert!(stores.get_console("p1", c).is_some());
    }

    #[test]
    fn update_reaches_live_records_only() {
        let mut stores = RecordStores::new(2, 2);
        stores.push_network("p1", net("r1"));
        stores.push_network("p1", net("r2"));
        stores.push_network("p1", net("r3")); // r1 evicted

        assert!(!stores.update_network("p1", "r1", |r| r.finished = true));
        assert!(stores.update_network("p1", "r3", |r| {
            r.status = Some(200);
            r.finished = true;
        }));
        let r3 = stores.get_network("p1", "r3").unwrap();
        assert_eq!(r3.status, Some(200));
        assert!(r3.finished);
    }

    #[test]
    fn stores_are_isolated_per_page_handle() {
        let mut stores = RecordStores::new(4, 4);
        stores.push_network("p1", net("r1"));
        assert!(stores.list_network("p2", 10).is_empty());
        stores.remove_page("p1");
        assert!(stores.list_network("p1", 10).is_empty());
    }

    #[test]
    fn list_returns_newest_tail() {
        let mut stores = RecordStores::new(10, 10);
        for i in 0..6 {
            stores.push_network("p1", net(&format!("r{i}")));
        }
        let tail = stores.list_network("p1", 2);
        let ids: Vec<_> = tail.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r5"]);
    }
}
