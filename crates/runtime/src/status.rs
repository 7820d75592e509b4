//! Per-view lifecycle state machine.
//!
//! Status is edge-triggered off the page's real navigation lifecycle, never
//! inferred from timers, and only main-frame events are forwarded; stray
//! sub-frame activity must not flicker the UI. Transitions are guarded: a
//! stop-loading outside the loading state is ignored.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadState {
    Idle,
    Loading,
    Ready,
    Failed,
}

/// Normalized lifecycle events fed by the view's debugging attachment.
#[derive(Debug, Clone)]
pub enum PageEvent {
    LoadStarted { main_frame: bool },
    DomReady,
    LoadStopped { main_frame: bool },
    NavigationCommitted { url: String, main_frame: bool, in_place: bool },
    TitleChanged(String),
    FaviconChanged(String),
    LoadFailed { error: String, main_frame: bool },
}

/// The status surface exposed to the host window layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub url: String,
    pub title: String,
    pub favicon: Option<String>,
    pub state: LoadState,
    pub loading: bool,
    pub ready: bool,
    pub failure: Option<String>,
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

#[derive(Debug)]
pub struct ViewStatus {
    url: String,
    title: String,
    favicon: Option<String>,
    state: LoadState,
    failure: Option<String>,
    can_go_back: bool,
    can_go_forward: bool,
    dom_ready: bool,
}

impl ViewStatus {
    pub fn new() -> Self {
        Self {
            url: String::new(),
            title: String::new(),
            favicon: None,
            state: LoadState::Idle,
            failure: None,
            can_go_back: false,
            can_go_forward: false,
            dom_ready: false,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Apply one lifecycle event. Returns a snapshot only when the visible
    /// status actually changed (edge-triggered emission).
    pub fn apply(&mut self, event: PageEvent) -> Option<StatusSnapshot> {
        let before = self.snapshot();
        match event {
            PageEvent::LoadStarted { main_frame } => {
                if !main_frame {
                    return None;
                }
                self.state = LoadState::Loading;
                self.dom_ready = false;
                self.failure = None;
            }
            PageEvent::DomReady => {
                // DOM readiness is only meaningful mid-load.
                if self.state == LoadState::Loading {
                    self.dom_ready = true;
                }
            }
            PageEvent::LoadStopped { main_frame } => {
                if !main_frame {
                    return None;
                }
                // Guard: a stray stop outside the loading state is noise.
                if self.state != LoadState::Loading {
                    return None;
                }
                self.state = LoadState::Ready;
            }
            PageEvent::NavigationCommitted { url, main_frame, in_place } => {
                if !main_frame {
                    return None;
                }
                self.url = url;
                if !in_place {
                    self.failure = None;
                }
            }
            PageEvent::TitleChanged(title) => {
                self.title = title;
            }
            PageEvent::FaviconChanged(favicon) => {
                self.favicon = Some(favicon);
            }
            PageEvent::LoadFailed { error, main_frame } => {
                if !main_frame {
                    return None;
                }
                self.state = LoadState::Failed;
                self.failure = Some(error);
            }
        }

        let after = self.snapshot();
        if after != before {
            Some(after)
        } else {
            None
        }
    }

    /// Navigation history availability, refreshed out of band.
    pub fn set_history(&mut self, can_go_back: bool, can_go_forward: bool) -> Option<StatusSnapshot> {
        if self.can_go_back == can_go_back && self.can_go_forward == can_go_forward {
            return None;
        }
        self.can_go_back = can_go_back;
        self.can_go_forward = can_go_forward;
        Some(self.snapshot())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            url: self.url.clone(),
            title: self.title.clone(),
            favicon: self.favicon.clone(),
            state: self.state,
            loading: self.state == LoadState::Loading,
            ready: self.state == LoadState::Ready || (self.state == LoadState::Loading && self.dom_ready),
            failure: self.failure.clone(),
            can_go_back: self.can_go_back,
            can_go_forward: self.can_go_forward,
        }
    }
}

impl Default for ViewStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_load_cycle_emits_on_each_edge() {
        let mut status = ViewStatus::new();

        let started = status.apply(PageEvent::LoadStarted { main_frame: true });
        assert!(started.unwrap().loading);

        let committed = status.apply(PageEvent::NavigationCommitted {
            url: "https://example.com".into(),
            main_frame: true,
            in_place: false,
        });
        assert_eq!(committed.unwrap().url, "https://example.com");

        let stopped = status.apply(PageEvent::LoadStopped { main_frame: true });
        let snap = stopped.unwrap();
        assert!(snap.ready);
        assert!(!snap.loading);
        assert_eq!(status.state(), LoadState::Ready);
    }

    #[test]
    fn stray_stop_outside_loading_is_ignored() {
        let mut status = ViewStatus::new();
        assert!(status.apply(PageEvent::LoadStopped { main_frame: true }).is_none());
        assert_eq!(status.state(), LoadState::Idle);

        // After a completed load, another stop is also noise.
        status.apply(PageEvent::LoadStarted { main_frame: true });
        status.apply(PageEvent::LoadStopped { main_frame: true });
        assert!(status.apply(PageEvent::LoadStopped { main_frame: true }).is_none());
    }

    #[test]
    fn sub_frame_events_never_emit() {
        let mut status = ViewStatus::new();
        status.apply(PageEvent::LoadStarted { main_frame: true });
        status.apply(PageEvent::LoadStopped { main_frame: true });

        assert!(status.apply(PageEvent::LoadStarted { main_frame: false }).is_none());
        assert!(status
            .apply(PageEvent::NavigationCommitted {
                url: "https://ads.example.com/frame".into(),
                main_frame: false,
                in_place: false,
            })
            .is_none());
        assert_eq!(status.state(), LoadState::Ready);
    }

    #[test]
    fn duplicate_title_does_not_emit() {
        let mut status = ViewStatus::new();
        assert!(status.apply(PageEvent::TitleChanged("Docs".into())).is_some());
        assert!(status.apply(PageEvent::TitleChanged("Docs".into())).is_none());
    }

    #[test]
    fn load_failure_carries_detail_and_clears_on_next_navigation() {
        let mut status = ViewStatus::new();
        status.apply(PageEvent::LoadStarted { main_frame: true });
        let failed = status
            .apply(PageEvent::LoadFailed {
                error: "net::ERR_NAME_NOT_RESOLVED".into(),
                main_frame: true,
            })
            .unwrap();
        assert_eq!(failed.failure.as_deref(), Some("net::ERR_NAME_NOT_RESOLVED"));
        assert_eq!(status.state(), LoadState::Failed);

        status.apply(PageEvent::LoadStarted { main_frame: true });
        assert!(status.snapshot().failure.is_none());
    }

    #[test]
    fn in_place_navigation_keeps_state_but_updates_url() {
        let mut status = ViewStatus::new();
        status.apply(PageEvent::LoadStarted { main_frame: true });
        status.apply(PageEvent::LoadStopped { main_frame: true });

        let snap = status
            .apply(PageEvent::NavigationCommitted {
                url: "https://example.com/#section".into(),
                main_frame: true,
                in_place: true,
            })
            .unwrap();
        assert_eq!(snap.url, "https://example.com/#section");
        assert_eq!(status.state(), LoadState::Ready);
    }

    #[test]
    fn history_availability_is_edge_triggered() {
        let mut status = ViewStatus::new();
        assert!(status.set_history(true, false).is_some());
        assert!(status.set_history(true, false).is_none());
        assert!(status.set_history(true, true).is_some());
    }
}
