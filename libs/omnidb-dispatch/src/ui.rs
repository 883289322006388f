//! UI collaborators the dispatcher drives.

use std::time::Duration;

/// Alert shown when the server reports that the session object is gone.
pub const SESSION_DESTROYED_NOTICE: &str = "Session object was destroyed, click <a href=\"/login\">here</a> to be redirected to login screen or finish what you were doing and reload the page.";

/// Alert shown when a call never reached the server.
pub const OFFLINE_NOTICE: &str =
    "Webserver was shutdown, please restart it and reload the application.";

/// Alert shown when the server answered with something other than an envelope.
pub const REQUEST_ERROR_NOTICE: &str = "Request error.";

/// Surface the dispatcher reports to: loading indicator, cancel button and
/// notification dialogs.
///
/// Methods are called synchronously from the task driving a call. No
/// dispatcher lock is held during a call, so implementations may query the
/// dispatcher or its loading indicator.
pub trait Ui: Send + Sync {
    /// Make the loading indicator visible.
    fn show_loading(&self, fade: Duration);

    /// Hide the loading indicator.
    fn hide_loading(&self, fade: Duration);

    fn set_cancel_button_visible(&self, visible: bool);

    /// Show a modal alert. The message may contain markup.
    fn show_alert(&self, message: &str);

    /// Display an application error payload nobody else handled.
    fn show_error(&self, data: &serde_json::Value);
}

/// Headless [`Ui`] that reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn show_loading(&self, fade: Duration) {
        tracing::trace!(?fade, "loading indicator shown");
    }

    fn hide_loading(&self, fade: Duration) {
        tracing::trace!(?fade, "loading indicator hidden");
    }

    fn set_cancel_button_visible(&self, visible: bool) {
        tracing::trace!(visible, "cancel button toggled");
    }

    fn show_alert(&self, message: &str) {
        tracing::warn!(message, "alert");
    }

    fn show_error(&self, data: &serde_json::Value) {
        tracing::error!(data = %data, "application error");
    }
}
