//! A viewer page's state and the handlers that drive it.
//!
//! `ViewerSession` owns the option map, persists it through an
//! [`OptionStore`], and renders responses into a [`PageView`]. Every handler
//! that changes what the viewer should show ends in [`ViewerSession::trigger_update`].

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use hachoir_client_core::cookie::OPTION_COOKIE_TTL_SECONDS;
use hachoir_client_core::options::{
    CMD_ADD_STREAM, CMD_DEL_STREAM, DISPLAY_TOGGLES, OPT_HPATH, OPT_STREAM, ViewerOptions,
    ensure_display_toggle, strip_quotes, toggle_checkbox_id,
};
use hachoir_client_core::store::OptionStore;
use hachoir_client_core::view::{PageView, StatusPlacement};
use reqwest::StatusCode;

use crate::client::{Download, DownloadKind, ViewerClient, ViewerClientError, store_error};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub ticket: u64,
    pub status: StatusCode,
    /// Updates rendered into the page; stale ones are not counted.
    pub rendered_updates: usize,
    /// A newer request was issued before this one finished.
    pub superseded: bool,
}

impl UpdateOutcome {
    #[must_use]
    pub fn completed(&self) -> bool {
        self.status == StatusCode::OK && !self.superseded
    }
}

pub struct ViewerSession<S, V> {
    client: ViewerClient,
    store: S,
    view: V,
    options: Mutex<ViewerOptions>,
    generation: AtomicU64,
    status_placement: StatusPlacement,
}

impl<S, V> ViewerSession<S, V>
where
    S: OptionStore,
    V: PageView,
{
    pub fn new(client: ViewerClient, store: S, view: V) -> Self {
        Self {
            client,
            store,
            view,
            options: Mutex::new(ViewerOptions::with_defaults()),
            generation: AtomicU64::new(0),
            status_placement: StatusPlacement::default(),
        }
    }

    #[must_use]
    pub fn with_status_placement(mut self, placement: StatusPlacement) -> Self {
        self.status_placement = placement;
        self
    }

    pub fn client(&self) -> &ViewerClient {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Copy of the current option map.
    pub fn options(&self) -> ViewerOptions {
        self.lock_options().clone()
    }

    /// Seed the defaults, restore persisted options and issue the first
    /// request.
    pub async fn init(&self) -> Result<UpdateOutcome, ViewerClientError> {
        *self.lock_options() = ViewerOptions::with_defaults();
        self.restore_options()?;
        self.trigger_update().await
    }

    /// Re-read every option a page keeps: the navigation state and the
    /// display toggles, the latter mirrored into their checkboxes.
    pub fn restore_options(&self) -> Result<(), ViewerClientError> {
        self.get_option(OPT_HPATH, false)?;
        self.get_option(OPT_STREAM, false)?;
        for toggle in DISPLAY_TOGGLES {
            self.get_option(toggle, true)?;
        }
        Ok(())
    }

    /// Load one persisted option into the map. Absent or empty values leave
    /// the map untouched.
    pub fn get_option(
        &self,
        name: &str,
        sync_checkbox: bool,
    ) -> Result<Option<String>, ViewerClientError> {
        let Some(stored) = self
            .store
            .get(name)
            .map_err(store_error)?
            .filter(|value| !value.is_empty())
        else {
            return Ok(None);
        };
        let value = strip_quotes(&stored).to_string();
        self.lock_options().set(name, value.as_str());
        if sync_checkbox {
            self.view.set_checkbox(&toggle_checkbox_id(name), value == "1");
        }
        Ok(Some(value))
    }

    /// Handler for a toggle checkbox: copy its state into the map, persist
    /// and refresh.
    pub async fn set_option(&self, name: &str) -> Result<UpdateOutcome, ViewerClientError> {
        let checkbox_id = toggle_checkbox_id(name);
        let checked = self
            .view
            .checkbox(&checkbox_id)
            .ok_or(ViewerClientError::MissingCheckbox(checkbox_id))?;
        self.apply_toggle(name, checked).await
    }

    /// Set a display toggle without a checkbox to read it from.
    pub async fn set_toggle(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<UpdateOutcome, ViewerClientError> {
        let name = ensure_display_toggle(name)?;
        self.view.set_checkbox(&toggle_checkbox_id(name), enabled);
        self.apply_toggle(name, enabled).await
    }

    async fn apply_toggle(
        &self,
        name: &str,
        enabled: bool,
    ) -> Result<UpdateOutcome, ViewerClientError> {
        self.lock_options().set_flag(name, enabled);
        self.save_options()?;
        self.trigger_update().await
    }

    /// Persist every option with the long-lived expiry.
    pub fn save_options(&self) -> Result<(), ViewerClientError> {
        let entries = self
            .lock_options()
            .persistent()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<Vec<_>>();
        for (name, value) in entries {
            self.store
                .set(&name, &value, Some(OPTION_COOKIE_TTL_SECONDS))
                .map_err(store_error)?;
        }
        Ok(())
    }

    /// Point the selected stream at `path`.
    pub async fn navigate_to(&self, path: &str) -> Result<UpdateOutcome, ViewerClientError> {
        self.lock_options().set_current_path(path)?;
        self.save_options()?;
        self.trigger_update().await
    }

    pub async fn select_stream(&self, index: usize) -> Result<UpdateOutcome, ViewerClientError> {
        self.lock_options().set(OPT_STREAM, index.to_string());
        self.save_options()?;
        self.trigger_update().await
    }

    /// Ask the viewer to parse the sub-stream at `path` as a new stream.
    pub async fn add_stream(&self, path: &str) -> Result<UpdateOutcome, ViewerClientError> {
        self.send_command(CMD_ADD_STREAM, path).await
    }

    pub async fn remove_stream(&self, index: usize) -> Result<UpdateOutcome, ViewerClientError> {
        self.send_command(CMD_DEL_STREAM, &index.to_string()).await
    }

    async fn send_command(
        &self,
        command: &str,
        argument: &str,
    ) -> Result<UpdateOutcome, ViewerClientError> {
        let payload = self.lock_options().to_payload_with_command(
            command,
            argument,
            self.client.payload_encoding(),
        );
        tracing::debug!(command, argument, "sending one-shot viewer command");
        let outcome = self.dispatch(payload).await;
        self.save_options()?;
        outcome
    }

    /// Show the busy indicator and post the current options.
    pub async fn trigger_update(&self) -> Result<UpdateOutcome, ViewerClientError> {
        let payload = self
            .lock_options()
            .to_payload(self.client.payload_encoding());
        self.dispatch(payload).await
    }

    pub fn show_busy(&self, busy: bool) {
        if self.status_placement == StatusPlacement::FollowScroll {
            self.view.move_status_to(self.view.scroll_offset());
        }
        self.view.set_status_visible(busy);
    }

    async fn dispatch(&self, payload: String) -> Result<UpdateOutcome, ViewerClientError> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.show_busy(true);

        let mut rendered_updates = 0;
        let result = self
            .client
            .send_request(self.client.backend_path(), payload, &self.store, |update| {
                if self.generation.load(Ordering::SeqCst) != ticket {
                    tracing::debug!(
                        ticket,
                        ready_state = ?update.ready_state,
                        "dropping update from superseded request"
                    );
                    return;
                }
                rendered_updates += 1;
                self.view.replace_content(update.text);
            })
            .await;

        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(ticket, error = %error, "viewer request failed, busy indicator stays on");
                return Err(error);
            }
        };

        let superseded = self.generation.load(Ordering::SeqCst) != ticket;
        if !superseded && response.status == StatusCode::OK {
            self.show_busy(false);
            self.restore_options()?;
        } else if !superseded {
            tracing::warn!(ticket, status = %response.status, "viewer answered with a non-200 status");
        }

        Ok(UpdateOutcome {
            ticket,
            status: response.status,
            rendered_updates,
            superseded,
        })
    }

    /// Download a field of the selected stream. `field` is appended to the
    /// stream's current path, the way the viewer's download links do.
    pub async fn download_field(
        &self,
        field: &str,
        kind: DownloadKind,
    ) -> Result<Download, ViewerClientError> {
        let (hpath, stream) = {
            let options = self.lock_options();
            (options.hpath_with_field(field)?, options.stream_index()?)
        };
        self.client
            .download(&hpath, stream, kind, &self.store)
            .await
    }

    /// Upload a new file, replacing the one the session is viewing. The
    /// viewer resets the navigation state through cookies, which are read
    /// back before returning.
    pub async fn upload_file(&self, path: &Path) -> Result<String, ViewerClientError> {
        let page = self.client.upload(path, &self.store).await?;
        self.restore_options()?;
        Ok(page)
    }

    fn lock_options(&self) -> MutexGuard<'_, ViewerOptions> {
        self.options
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
