use std::collections::BTreeMap;
use std::sync::Mutex;

/// The page a viewer session renders into.
///
/// Only `replace_content` is required. A page without a status indicator or
/// checkboxes keeps the default no-op methods, which matches a page that
/// simply lacks those elements.
pub trait PageView: Send + Sync {
    /// Replace the content container with an HTML fragment, verbatim.
    fn replace_content(&self, html: &str);

    fn set_status_visible(&self, _visible: bool) {}

    /// Move the status indicator to `top`, for pages where it must track
    /// the scroll position.
    fn move_status_to(&self, _top: i64) {}

    fn scroll_offset(&self) -> i64 {
        0
    }

    /// Checked state of the checkbox with id `id`, `None` when absent.
    fn checkbox(&self, _id: &str) -> Option<bool> {
        None
    }

    fn set_checkbox(&self, _id: &str, _checked: bool) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusPlacement {
    #[default]
    Static,
    FollowScroll,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub content: String,
    pub content_updates: usize,
    pub status_visible: bool,
    pub status_top: Option<i64>,
    pub scroll_offset: i64,
    pub checkboxes: BTreeMap<String, bool>,
}

/// Headless page that keeps everything it is told in memory.
#[derive(Debug, Default)]
pub struct MemoryPage {
    state: Mutex<PageSnapshot>,
}

impl MemoryPage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_checkboxes<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        let page = Self::new();
        {
            let mut state = page.lock();
            for id in ids {
                state.checkboxes.insert(id.to_string(), false);
            }
        }
        page
    }

    pub fn snapshot(&self) -> PageSnapshot {
        self.lock().clone()
    }

    /// Simulate the user clicking a checkbox.
    pub fn click(&self, id: &str, checked: bool) {
        self.lock().checkboxes.insert(id.to_string(), checked);
    }

    pub fn scroll_to(&self, offset: i64) {
        self.lock().scroll_offset = offset;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PageSnapshot> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PageView for MemoryPage {
    fn replace_content(&self, html: &str) {
        let mut state = self.lock();
        state.content = html.to_string();
        state.content_updates += 1;
    }

    fn set_status_visible(&self, visible: bool) {
        self.lock().status_visible = visible;
    }

    fn move_status_to(&self, top: i64) {
        self.lock().status_top = Some(top);
    }

    fn scroll_offset(&self) -> i64 {
        self.lock().scroll_offset
    }

    fn checkbox(&self, id: &str) -> Option<bool> {
        self.lock().checkboxes.get(id).copied()
    }

    fn set_checkbox(&self, id: &str, checked: bool) {
        if let Some(state) = self.lock().checkboxes.get_mut(id) {
            *state = checked;
        }
    }
}
