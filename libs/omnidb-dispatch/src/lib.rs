#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Request dispatcher for the `OmniDB` web client
//!
//! Every call the client makes goes through one session-scoped
//! [`Dispatcher`], which:
//! - POSTs `{"data": ..., "tab_token": ""}` to `base_url + url`
//! - Adds the CSRF header (read from the `omnidb_csrftoken` cookie) to
//!   same-origin requests with unsafe methods
//! - Reference-counts a loading indicator across overlapping calls
//! - Tracks the most recently issued call so it can be cancelled
//! - Interprets the `{v_error, v_error_id, v_data}` response envelope and
//!   routes it to success, application error or session loss
//! - Turns transport failures into user notices
//!
//! # Example
//!
//! ```ignore
//! use omnidb_dispatch::{AjaxRequest, Dispatcher, Outcome};
//! use serde_json::json;
//!
//! let dispatcher = Dispatcher::builder()
//!     .base_url("https://omnidb.example.com/")
//!     .build()?;
//!
//! let call = dispatcher.exec(
//!     AjaxRequest::new("get_tree_info/")
//!         .data(&json!({"p_database_index": 0}))
//!         .cancel_button(true),
//! )?;
//!
//! // Elsewhere, e.g. when the user hits the cancel button:
//! // dispatcher.cancel();
//!
//! match call.await {
//!     Outcome::Success(envelope) => println!("{}", envelope.data),
//!     other => eprintln!("{other:?}"),
//! }
//! ```

mod config;
mod cookie;
mod csrf;
mod dispatcher;
mod envelope;
mod error;
mod layers;
mod loading;
mod outcome;
mod request;
mod transport;
pub mod ui;

pub use config::{
    DEFAULT_CSRF_COOKIE, DEFAULT_CSRF_HEADER, DEFAULT_FADE, DEFAULT_MAX_BODY_SIZE,
    DEFAULT_USER_AGENT, DispatcherConfig, TransportSecurity,
};
pub use cookie::{CookieJar, get_cookie};
pub use csrf::{csrf_safe_method, is_same_origin, needs_csrf_header};
pub use dispatcher::{CallHandle, CallId, Dispatcher, DispatcherBuilder, PendingCall};
pub use envelope::{Envelope, EnvelopeStatus, SESSION_DESTROYED_ERROR_ID};
pub use error::{BoxError, DispatchError, TransportError, TransportErrorKind};
pub use layers::{CsrfLayer, CsrfService, CsrfToken};
pub use loading::{LoadingGuard, LoadingIndicator};
pub use outcome::Outcome;
pub use request::{AjaxRequest, Callbacks};
pub use transport::{ERROR_BODY_PREVIEW_LIMIT, HttpTransport, ResponseBody, TransportResponse};
pub use ui::{TracingUi, Ui};
