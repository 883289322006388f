use crate::envelope::Envelope;
use crate::error::{DispatchError, TransportError};
use serde::Serialize;

/// One call to issue through the [`Dispatcher`](crate::Dispatcher).
///
/// The payload is sent as `{"data": <payload>, "tab_token": ""}`.
///
/// # Example
///
/// ```ignore
/// let call = dispatcher.exec(
///     AjaxRequest::new("get_tree_postgresql/")
///         .data(&json!({"p_database_index": 0}))
///         .cancel_button(true),
/// )?;
/// match call.await {
///     Outcome::Success(envelope) => render(envelope.data),
///     other => tracing::debug!(?other, "tree not loaded"),
/// }
/// ```
#[must_use = "AjaxRequest does nothing until passed to Dispatcher::exec"]
#[derive(Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct AjaxRequest {
    pub(crate) url: String,
    pub(crate) data: serde_json::Value,
    pub(crate) notify: bool,
    pub(crate) show_loading: bool,
    pub(crate) show_cancel_button: bool,
    pub(crate) handles_app_errors: bool,
    /// Error captured during building (deferred to `exec()`)
    pub(crate) error: Option<DispatchError>,
}

impl AjaxRequest {
    /// `url` is appended verbatim to the configured base URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data: serde_json::Value::Null,
            notify: false,
            show_loading: true,
            show_cancel_button: false,
            handles_app_errors: false,
            error: None,
        }
    }

    /// Set the payload. Serialization failures surface from `exec()`.
    pub fn data<T: Serialize + ?Sized>(mut self, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => self.data = value,
            Err(e) => self.error = Some(DispatchError::Payload(e)),
        }
        self
    }

    /// Notification mode flag. Carried into the call's tracing span.
    pub fn notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    /// Whether the call drives the loading indicator (default: true).
    pub fn loading(mut self, show: bool) -> Self {
        self.show_loading = show;
        self
    }

    /// Whether the cancel button is shown while the call runs (default: false).
    pub fn cancel_button(mut self, show: bool) -> Self {
        self.show_cancel_button = show;
        self
    }

    /// Declare that the caller handles application errors itself.
    ///
    /// Without it, an application error's payload is displayed through
    /// [`Ui::show_error`](crate::Ui::show_error). Session loss is always
    /// reported by the dispatcher.
    pub fn handle_app_errors(mut self, handles: bool) -> Self {
        self.handles_app_errors = handles;
        self
    }
}

/// Body sent for every call.
#[derive(Serialize)]
pub(crate) struct RequestBody<'a> {
    pub data: &'a serde_json::Value,
    pub tab_token: &'a str,
}

type EnvelopeCallback = Box<dyn FnOnce(Envelope) + Send + 'static>;
type TransportCallback = Box<dyn FnOnce(&TransportError) + Send + 'static>;

/// Callback-style outcome handlers for
/// [`Dispatcher::exec_with_callbacks`](crate::Dispatcher::exec_with_callbacks).
///
/// Each handler runs at most once, on the runtime thread that completes the call.
#[derive(Default)]
pub struct Callbacks {
    pub(crate) on_success: Option<EnvelopeCallback>,
    pub(crate) on_error: Option<EnvelopeCallback>,
    pub(crate) on_transport_error: Option<TransportCallback>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_transport_error", &self.on_transport_error.is_some())
            .finish()
    }
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_success(mut self, f: impl FnOnce(Envelope) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(f));
        self
    }

    /// Handle application errors (except session loss).
    #[must_use]
    pub fn on_error(mut self, f: impl FnOnce(Envelope) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Observe transport failures, aborts included. Runs before the loading
    /// indicator is released.
    #[must_use]
    pub fn on_transport_error(mut self, f: impl FnOnce(&TransportError) + Send + 'static) -> Self {
        self.on_transport_error = Some(Box::new(f));
        self
    }
}
