//! Tower layers for the dispatcher's transport
//!
//! - [`CsrfLayer`] - Attaches the CSRF token to unsafe same-origin requests

mod csrf;

pub use csrf::{CsrfLayer, CsrfService, CsrfToken};
