//! Hyper-based transport with a small tower middleware stack.

use crate::config::{DispatcherConfig, TransportSecurity, check_scheme};
use crate::envelope::Envelope;
use crate::error::{BoxError, DispatchError, TransportError};
use crate::layers::CsrfLayer;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};

/// Maximum body preview kept in [`TransportError::Status`] (8KB).
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Boxed response body handed out by the service stack.
pub type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

type TransportService =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, TransportError>;

/// Buffered response of one call, before envelope interpretation.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    /// Interpret the body as a response envelope.
    ///
    /// # Errors
    /// - `TransportError::Status` for non-2xx responses (with a body preview)
    /// - `TransportError::InvalidEnvelope` if a 2xx body is not an envelope
    pub fn envelope(&self) -> Result<Envelope, TransportError> {
        if !self.status.is_success() {
            let preview_len = self.body.len().min(ERROR_BODY_PREVIEW_LIMIT);
            return Err(TransportError::Status {
                status: self.status,
                body_preview: String::from_utf8_lossy(&self.body[..preview_len]).into_owned(),
            });
        }
        serde_json::from_slice(&self.body).map_err(TransportError::InvalidEnvelope)
    }
}

/// Sends prepared requests and buffers their responses.
///
/// Cloning is cheap; the connection pool is shared between clones.
#[derive(Clone)]
pub struct HttpTransport {
    service: TransportService,
    max_body_size: usize,
    security: TransportSecurity,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("max_body_size", &self.max_body_size)
            .field("security", &self.security)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build the transport for a dispatcher configuration.
    ///
    /// Stack (outer to inner): error mapping -> `Timeout` (optional) ->
    /// `Csrf` -> hyper client.
    ///
    /// # Errors
    /// Returns an error if TLS initialization fails or a configured header is
    /// invalid
    pub fn from_config(config: &DispatcherConfig) -> Result<Self, DispatchError> {
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 session cookies and CSRF tokens travel unencrypted"
            );
        }

        let https = build_https_connector(config.transport)?;
        let hyper_client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(https);

        let headers = ServiceBuilder::new()
            .layer(CsrfLayer::try_new(
                &config.csrf_header_name,
                config.resolved_page_origin()?,
            )?)
            .service(hyper_client)
            .map_err(|e: hyper_util::client::legacy::Error| -> BoxError { Box::new(e) });

        // Both arms of the optional timeout must share the BoxError error type
        let timeout = config.request_timeout;
        let service = ServiceBuilder::new()
            .option_layer(timeout.map(TimeoutLayer::new))
            .service(headers)
            .map_response(box_response_body)
            .map_err(move |e: BoxError| map_tower_error(e, timeout));

        Ok(Self {
            service: BoxCloneSyncService::new(service),
            max_body_size: config.max_body_size,
            security: config.transport,
        })
    }

    /// Reject targets the transport security mode does not allow.
    ///
    /// # Errors
    /// Returns `DispatchError::InsecureScheme` for non-HTTPS targets under
    /// `TlsOnly`, and for schemes other than `http`/`https`
    pub fn check_scheme(&self, target: &url::Url) -> Result<(), DispatchError> {
        check_scheme(target, self.security)
    }

    /// Send one request and buffer the whole response body.
    ///
    /// Any HTTP status is returned as `Ok`; use
    /// [`TransportResponse::envelope`] to apply the status check.
    ///
    /// # Errors
    /// - `TransportError::Unreachable` / `Timeout` if no response arrived
    /// - `TransportError::BodyTooLarge` if the body exceeds the limit
    pub async fn send(&self, req: Request<Full<Bytes>>) -> Result<TransportResponse, TransportError> {
        let response = self.service.clone().oneshot(req).await?;
        let (parts, body) = response.into_parts();

        let body = collect_limited(body, self.max_body_size)
            .await
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    TransportError::BodyTooLarge {
                        limit: self.max_body_size,
                    }
                } else {
                    TransportError::Unreachable(e)
                }
            })?
            .to_bytes();

        Ok(TransportResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

// Returns a `Send` opaque future so the async caller does not have to prove
// `Send` for the `Limited` body's higher-ranked error conversion bound.
fn collect_limited(
    body: ResponseBody,
    limit: usize,
) -> impl Future<Output = Result<http_body_util::Collected<Bytes>, BoxError>> + Send {
    Limited::new(body, limit).collect()
}

fn box_response_body<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    response.map(|body| body.map_err(Into::into).boxed())
}

/// Map tower errors to `TransportError` with the configured timeout.
fn map_tower_error(err: BoxError, timeout: Option<Duration>) -> TransportError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return TransportError::Timeout(timeout.unwrap_or_default());
    }
    TransportError::Unreachable(err)
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn build_https_connector(
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, DispatchError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())
        .map_err(|e| DispatchError::Tls(Box::new(e)))?;
    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => {
            builder.https_or_http().enable_all_versions().build()
        }
        TransportSecurity::TlsOnly => builder.https_only().enable_all_versions().build(),
    };
    Ok(connector)
}
