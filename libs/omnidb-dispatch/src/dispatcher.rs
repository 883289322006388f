use crate::config::{DispatcherConfig, TransportSecurity, parse_url};
use crate::cookie::CookieJar;
use crate::csrf::is_same_origin;
use crate::envelope::Envelope;
use crate::error::{DispatchError, TransportError, TransportErrorKind};
use crate::layers::CsrfToken;
use crate::loading::{LoadingGuard, LoadingIndicator};
use crate::outcome::Outcome;
use crate::request::{AjaxRequest, Callbacks, RequestBody};
use crate::transport::HttpTransport;
use crate::ui::{OFFLINE_NOTICE, REQUEST_ERROR_NOTICE, SESSION_DESTROYED_NOTICE, TracingUi, Ui};
use bytes::Bytes;
use http_body_util::Full;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Identifier of one call, unique within a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cancel capability of a single call.
///
/// Unlike [`Dispatcher::cancel`], a handle keeps working after a newer call
/// has taken over the dispatcher's active slot.
#[derive(Debug, Clone)]
pub struct CallHandle {
    id: CallId,
    token: CancellationToken,
}

impl CallHandle {
    #[must_use]
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Abort the call. A no-op once the call has finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A call in flight; resolves to its [`Outcome`].
///
/// Dropping it does not cancel the call: loading bookkeeping and notices
/// still happen, only the outcome is discarded.
#[must_use = "the outcome is discarded unless the PendingCall is awaited"]
#[derive(Debug)]
pub struct PendingCall {
    handle: CallHandle,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingCall {
    #[must_use]
    pub fn id(&self) -> CallId {
        self.handle.id
    }

    #[must_use]
    pub fn handle(&self) -> &CallHandle {
        &self.handle
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl Future for PendingCall {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The sender only disappears without a value if the runtime dropped the task
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or_else(|_| Outcome::Transport(TransportError::Aborted)))
    }
}

struct ActiveCall {
    id: CallId,
    token: CancellationToken,
}

struct Inner {
    config: DispatcherConfig,
    page_origin: url::Origin,
    user_agent: http::HeaderValue,
    transport: HttpTransport,
    loading: Arc<LoadingIndicator>,
    cookies: Arc<CookieJar>,
    ui: Arc<dyn Ui>,
    active: Mutex<Option<ActiveCall>>,
    next_id: AtomicU64,
}

/// Session-scoped request dispatcher.
///
/// Owns the loading indicator, the cookie jar and the single active-call
/// slot. Cloning is cheap and every clone shares that state.
///
/// # Example
///
/// ```ignore
/// let dispatcher = Dispatcher::builder()
///     .base_url("http://127.0.0.1:8000/")
///     .allow_insecure_http()
///     .ui(Arc::new(MyUi::default()))
///     .build()?;
///
/// dispatcher.cookies().set("omnidb_csrftoken", &token);
///
/// let outcome = dispatcher
///     .exec(AjaxRequest::new("get_databases/").data(&json!({})))?
///     .await;
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("base_url", &self.inner.config.base_url)
            .field("loading", &self.inner.loading)
            .field("active", &self.active_call())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher from a configuration and a UI.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or TLS setup fails
    pub fn new(config: DispatcherConfig, ui: Arc<dyn Ui>) -> Result<Self, DispatchError> {
        DispatcherBuilder::with_config(config).ui(ui).build()
    }

    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// The session's loading indicator (`start_loading` / `end_loading`).
    #[must_use]
    pub fn loading(&self) -> &Arc<LoadingIndicator> {
        &self.inner.loading
    }

    #[must_use]
    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.inner.cookies
    }

    /// Current CSRF token from the cookie jar.
    #[must_use]
    pub fn csrf_token(&self) -> Option<String> {
        self.inner.cookies.get(&self.inner.config.csrf_cookie_name)
    }

    /// Call currently tracked by the active slot, if any.
    #[must_use]
    pub fn active_call(&self) -> Option<CallId> {
        self.inner.active.lock().as_ref().map(|a| a.id)
    }

    /// Issue a call and return immediately.
    ///
    /// The new call replaces the active slot without cancelling the call it
    /// supersedes. Side effects happen in order: loading indicator (if
    /// requested), cancel button visibility, CSRF token read.
    ///
    /// # Errors
    /// Returns an error, before any side effect, if the payload could not be
    /// serialized, the target URL is invalid or not allowed, or no tokio
    /// runtime is available
    pub fn exec(&self, request: AjaxRequest) -> Result<PendingCall, DispatchError> {
        self.dispatch(request, Callbacks::default())
    }

    /// Issue a call whose outcome is delivered to callbacks.
    ///
    /// Registering `on_error` marks the request as handling application
    /// errors; otherwise their payload is shown through [`Ui::show_error`].
    ///
    /// # Errors
    /// Same as [`Dispatcher::exec`]
    pub fn exec_with_callbacks(
        &self,
        request: AjaxRequest,
        callbacks: Callbacks,
    ) -> Result<CallHandle, DispatchError> {
        let request = request.handle_app_errors(callbacks.on_error.is_some());
        let pending = self.dispatch(request, callbacks)?;
        Ok(pending.handle)
    }

    /// Abort the call tracked by the active slot.
    ///
    /// Returns whether a call was signalled; with no active call this is a
    /// no-op. The aborted call resolves to `Outcome::Transport(Aborted)`
    /// without any notice.
    pub fn cancel(&self) -> bool {
        let slot = self.inner.active.lock();
        if let Some(active) = slot.as_ref() {
            tracing::debug!(call_id = %active.id, "cancelling active call");
            active.token.cancel();
            true
        } else {
            tracing::trace!("cancel requested with no active call");
            false
        }
    }

    fn dispatch(
        &self,
        mut request: AjaxRequest,
        callbacks: Callbacks,
    ) -> Result<PendingCall, DispatchError> {
        if let Some(e) = request.error.take() {
            return Err(e);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;

        let target = parse_url(&format!("{}{}", self.inner.config.base_url, request.url))?;
        self.inner.transport.check_scheme(&target)?;
        let same_origin = is_same_origin(&target, &self.inner.page_origin);
        let mut http_request = self.build_request(&target, &request.data, same_origin)?;

        let loading = request.show_loading.then(|| self.inner.loading.begin());
        self.inner
            .ui
            .set_cancel_button_visible(request.show_cancel_button);
        if let Some(token) = self.csrf_token() {
            http_request.extensions_mut().insert(CsrfToken(token));
        }

        let id = CallId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let handle = CallHandle {
            id,
            token: CancellationToken::new(),
        };
        let superseded = self.inner.active.lock().replace(ActiveCall {
            id,
            token: handle.token.clone(),
        });
        if let Some(prev) = superseded {
            tracing::debug!(call_id = %id, superseded = %prev.id, "active call slot replaced");
        }

        let span = tracing::debug_span!(
            "ajax_call",
            call_id = %id,
            url = %request.url,
            notify = request.notify,
        );
        let call = Call {
            dispatcher: self.clone(),
            id,
            cancel: handle.token.clone(),
            loading,
            same_origin,
            handles_app_errors: request.handles_app_errors,
            callbacks,
        };
        let (tx, rx) = oneshot::channel();
        runtime.spawn(
            async move {
                let outcome = call.run(http_request).await;
                if tx.send(outcome).is_err() {
                    tracing::trace!("pending call dropped before completion");
                }
            }
            .instrument(span),
        );

        Ok(PendingCall { handle, rx })
    }

    fn build_request(
        &self,
        target: &url::Url,
        data: &serde_json::Value,
        same_origin: bool,
    ) -> Result<http::Request<Full<Bytes>>, DispatchError> {
        let body = serde_json::to_vec(&RequestBody {
            data,
            tab_token: "",
        })?;

        let mut builder = http::Request::builder()
            .method(http::Method::POST)
            .uri(target.as_str())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::ACCEPT, "application/json")
            .header(http::header::USER_AGENT, self.inner.user_agent.clone());

        // Cookies only travel to the page's own origin
        if same_origin && !self.inner.cookies.is_empty() {
            let cookie = http::HeaderValue::from_str(&self.inner.cookies.cookie_string())?;
            builder = builder.header(http::header::COOKIE, cookie);
        }

        Ok(builder.body(Full::new(Bytes::from(body)))?)
    }

    fn release_slot(&self, id: CallId) {
        let mut slot = self.inner.active.lock();
        if slot.as_ref().is_some_and(|a| a.id == id) {
            *slot = None;
        }
    }
}

/// State a spawned call carries until it reaches a terminal outcome.
struct Call {
    dispatcher: Dispatcher,
    id: CallId,
    cancel: CancellationToken,
    loading: Option<LoadingGuard>,
    same_origin: bool,
    handles_app_errors: bool,
    callbacks: Callbacks,
}

impl Call {
    async fn run(mut self, request: http::Request<Full<Bytes>>) -> Outcome {
        let inner = &self.dispatcher.inner;

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TransportError::Aborted),
            res = inner.transport.send(request) => res,
        };

        let result = result.and_then(|response| {
            if self.same_origin {
                inner.cookies.absorb_set_cookie(&response.headers);
            }
            response.envelope()
        });
        self.dispatcher.release_slot(self.id);

        let outcome = match result {
            Ok(envelope) => {
                self.end_loading();
                self.route_envelope(envelope)
            }
            Err(err) => {
                if let Some(on_transport_error) = self.callbacks.on_transport_error.take() {
                    on_transport_error(&err);
                }
                self.end_loading();
                self.report_transport_error(&err);
                Outcome::Transport(err)
            }
        };

        tracing::info!(outcome = outcome.label(), "call finished");
        outcome
    }

    fn end_loading(&mut self) {
        if let Some(guard) = self.loading.take() {
            guard.finish();
        }
    }

    fn route_envelope(&mut self, envelope: Envelope) -> Outcome {
        let ui = &self.dispatcher.inner.ui;
        let outcome = Outcome::from_envelope(envelope);

        match &outcome {
            Outcome::SessionExpired(_) => {
                tracing::warn!("server reported a destroyed session");
                ui.show_alert(SESSION_DESTROYED_NOTICE);
            }
            Outcome::AppError(envelope) => {
                if let Some(on_error) = self.callbacks.on_error.take() {
                    on_error(envelope.clone());
                } else if !self.handles_app_errors {
                    ui.show_error(&envelope.data);
                }
            }
            Outcome::Success(envelope) => {
                if let Some(on_success) = self.callbacks.on_success.take() {
                    on_success(envelope.clone());
                }
            }
            Outcome::Transport(_) => {}
        }
        outcome
    }

    fn report_transport_error(&self, err: &TransportError) {
        let ui = &self.dispatcher.inner.ui;
        match err.kind() {
            TransportErrorKind::Aborted => tracing::debug!("call aborted"),
            TransportErrorKind::Offline => {
                tracing::warn!(error = %err, "server unreachable");
                ui.show_alert(OFFLINE_NOTICE);
            }
            TransportErrorKind::Request => {
                tracing::warn!(error = %err, status_text = err.status_text(), "request failed");
                ui.show_alert(REQUEST_ERROR_NOTICE);
            }
        }
    }
}

/// Builder for a [`Dispatcher`].
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    ui: Option<Arc<dyn Ui>>,
    cookies: Option<Arc<CookieJar>>,
}

impl DispatcherBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    #[must_use]
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            config,
            ui: None,
            cookies: None,
        }
    }

    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Origin the UI was served from, when it differs from the base URL's
    #[must_use]
    pub fn page_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.page_origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn csrf_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.config.csrf_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn fade(mut self, fade: Duration) -> Self {
        self.config.fade = fade;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain HTTP targets.
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature; release configurations set `transport` explicitly.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// UI the dispatcher reports to. Default: [`TracingUi`]
    #[must_use]
    pub fn ui(mut self, ui: Arc<dyn Ui>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Share an existing cookie jar. Default: an empty jar
    #[must_use]
    pub fn cookie_jar(mut self, cookies: Arc<CookieJar>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    /// # Errors
    /// Returns an error if the configuration is invalid or TLS setup fails
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        self.config.validate()?;

        let page_origin = self.config.resolved_page_origin()?;
        let user_agent = http::HeaderValue::from_str(&self.config.user_agent)?;
        let transport = HttpTransport::from_config(&self.config)?;
        let ui = self.ui.unwrap_or_else(|| Arc::new(TracingUi));
        let loading = Arc::new(LoadingIndicator::new(Arc::clone(&ui), self.config.fade));

        tracing::debug!(
            base_url = %self.config.base_url,
            page_origin = %page_origin.ascii_serialization(),
            "dispatcher ready"
        );

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                config: self.config,
                page_origin,
                user_agent,
                transport,
                loading,
                cookies: self.cookies.unwrap_or_default(),
                ui,
                active: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = DispatcherBuilder::new();
        assert_eq!(builder.config, DispatcherConfig::default());
        assert!(builder.ui.is_none());
        assert!(builder.cookies.is_none());
    }

    #[test]
    fn test_builder_overrides() {
        let builder = DispatcherBuilder::new()
            .base_url("http://localhost:8000/omnidb/")
            .page_origin("http://localhost:8000")
            .csrf_cookie_name("csrftoken")
            .timeout(Duration::from_secs(5))
            .fade(Duration::ZERO)
            .allow_insecure_http();

        assert_eq!(builder.config.base_url, "http://localhost:8000/omnidb/");
        assert_eq!(
            builder.config.page_origin.as_deref(),
            Some("http://localhost:8000")
        );
        assert_eq!(builder.config.csrf_cookie_name, "csrftoken");
        assert_eq!(builder.config.request_timeout, Some(Duration::from_secs(5)));
        assert_eq!(builder.config.fade, Duration::ZERO);
        assert_eq!(
            builder.config.transport,
            TransportSecurity::AllowInsecureHttp
        );
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = DispatcherBuilder::new().base_url("::not-a-url").build();
        assert!(matches!(result, Err(DispatchError::InvalidUrl { .. })));
    }

    #[test]
    fn test_call_id_display() {
        assert_eq!(CallId(7).to_string(), "#7");
    }

    #[test]
    fn test_exec_outside_runtime() {
        let dispatcher = Dispatcher::builder()
            .base_url("http://localhost:8000/")
            .allow_insecure_http()
            .build()
            .unwrap();

        let result = dispatcher.exec(AjaxRequest::new("x/"));
        assert!(matches!(result, Err(DispatchError::NoRuntime)));
        assert_eq!(dispatcher.loading().pending(), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_active_call_is_noop() {
        let dispatcher = Dispatcher::builder()
            .base_url("http://localhost:8000/")
            .allow_insecure_http()
            .build()
            .unwrap();

        assert!(!dispatcher.cancel());
        assert_eq!(dispatcher.active_call(), None);
        assert_eq!(dispatcher.loading().pending(), 0);
    }

    #[test]
    fn test_default_builder_builds() {
        let dispatcher = Dispatcher::builder().build().unwrap();
        assert_eq!(dispatcher.config().base_url, "https://127.0.0.1:8000/");
    }

    #[test]
    fn test_plain_http_base_url_requires_insecure_transport() {
        let result = Dispatcher::builder()
            .base_url("http://localhost:8000/")
            .build();
        assert!(matches!(
            result,
            Err(DispatchError::InsecureScheme { ref scheme }) if scheme == "http"
        ));
    }

    #[test]
    fn test_invalid_user_agent_rejected() {
        let result = Dispatcher::builder().user_agent("bad\nagent").build();
        assert!(matches!(result, Err(DispatchError::InvalidHeaderValue(_))));
    }
}
