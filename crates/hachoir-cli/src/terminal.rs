use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use hachoir_client_core::options::{DISPLAY_TOGGLES, toggle_checkbox_id};
use hachoir_client_core::view::PageView;

#[derive(Debug, Default)]
struct TerminalState {
    content: String,
    busy: bool,
    checkboxes: BTreeMap<String, bool>,
}

/// Page for a terminal. The busy line and partial-update progress go to
/// stderr; the content is kept until the caller prints it.
#[derive(Debug)]
pub struct TerminalPage {
    state: Mutex<TerminalState>,
    progress: bool,
}

impl TerminalPage {
    pub fn new(progress: bool) -> Self {
        let checkboxes = DISPLAY_TOGGLES
            .iter()
            .map(|name| (toggle_checkbox_id(name), false))
            .collect();
        Self {
            state: Mutex::new(TerminalState {
                checkboxes,
                ..TerminalState::default()
            }),
            progress,
        }
    }

    pub fn content(&self) -> String {
        self.lock().content.clone()
    }

    /// Display toggles currently switched on, as `raw,hex` style text.
    pub fn enabled_toggles(&self) -> String {
        self.lock()
            .checkboxes
            .iter()
            .filter(|(_, checked)| **checked)
            .filter_map(|(id, _)| id.strip_prefix("check_"))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn lock(&self) -> MutexGuard<'_, TerminalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PageView for TerminalPage {
    fn replace_content(&self, html: &str) {
        let mut state = self.lock();
        state.content = html.to_string();
        if self.progress && state.busy {
            eprint!("\rloading... {} bytes", html.len());
        }
    }

    fn set_status_visible(&self, visible: bool) {
        let mut state = self.lock();
        if self.progress {
            if visible && !state.busy {
                eprint!("loading...");
            } else if !visible && state.busy {
                eprintln!();
            }
        }
        state.busy = visible;
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
