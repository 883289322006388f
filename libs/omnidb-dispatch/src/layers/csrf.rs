use crate::csrf::needs_csrf_header;
use crate::error::DispatchError;
use http::header::HeaderName;
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// CSRF token read for a request, carried as a request extension.
///
/// The token is captured when the call is issued, so the layer never reads
/// the cookie jar itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

/// Tower layer that attaches the CSRF header to requests that need it
///
/// A request gets the header only when its method is not CSRF-safe, its
/// target is same-origin with the page and a [`CsrfToken`] extension is
/// present. A header set by the caller is left untouched.
#[derive(Clone)]
pub struct CsrfLayer {
    header: HeaderName,
    page_origin: url::Origin,
}

impl CsrfLayer {
    /// # Errors
    /// Returns `DispatchError::InvalidHeaderName` if `header` is not a valid
    /// header name
    pub fn try_new(header: &str, page_origin: url::Origin) -> Result<Self, DispatchError> {
        let header = HeaderName::try_from(header)?;
        Ok(Self {
            header,
            page_origin,
        })
    }
}

impl<S> Layer<S> for CsrfLayer {
    type Service = CsrfService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CsrfService {
            inner,
            header: self.header.clone(),
            page_origin: self.page_origin.clone(),
        }
    }
}

/// Service that attaches the CSRF header
#[derive(Clone)]
pub struct CsrfService<S> {
    inner: S,
    header: HeaderName,
    page_origin: url::Origin,
}

impl<S> CsrfService<S> {
    fn token_header<B>(&self, req: &Request<B>) -> Option<HeaderValue> {
        if req.headers().contains_key(&self.header) {
            return None;
        }
        let token = req.extensions().get::<CsrfToken>()?;
        let target = url::Url::parse(&req.uri().to_string()).ok()?;
        if !needs_csrf_header(req.method(), &target, &self.page_origin) {
            return None;
        }
        match HeaderValue::from_str(&token.0) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("CSRF token is not a valid header value; sending without it");
                None
            }
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CsrfService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if let Some(value) = self.token_header(&req) {
            req.headers_mut().insert(self.header.clone(), value);
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use tower::ServiceExt;

    /// Test service that asserts on the CSRF header.
    #[derive(Clone)]
    struct CheckCsrfService {
        expected: Option<HeaderValue>,
    }

    impl Service<Request<Full<Bytes>>> for CheckCsrfService {
        type Response = Response<Full<Bytes>>;
        type Error = Box<dyn std::error::Error + Send + Sync>;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            assert_eq!(req.headers().get("x-csrftoken"), self.expected.as_ref());
            std::future::ready(Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::new()))
                .unwrap()))
        }
    }

    fn layer() -> CsrfLayer {
        let origin = url::Url::parse("http://localhost:8000/").unwrap().origin();
        CsrfLayer::try_new("X-CSRFToken", origin).unwrap()
    }

    fn request(method: Method, uri: &str, token: Option<&str>) -> Request<Full<Bytes>> {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap();
        if let Some(token) = token {
            req.extensions_mut().insert(CsrfToken(token.to_owned()));
        }
        req
    }

    #[tokio::test]
    async fn test_token_attached_to_same_origin_post() {
        let mut service = layer().layer(CheckCsrfService {
            expected: Some(HeaderValue::from_static("tok")),
        });
        let req = request(Method::POST, "http://localhost:8000/omnidb/save/", Some("tok"));
        service.ready().await.unwrap().call(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_token_skipped_for_safe_method() {
        let mut service = layer().layer(CheckCsrfService { expected: None });
        let req = request(Method::GET, "http://localhost:8000/omnidb/", Some("tok"));
        service.ready().await.unwrap().call(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_token_skipped_cross_origin() {
        let mut service = layer().layer(CheckCsrfService { expected: None });
        let req = request(Method::POST, "http://other-host:8000/save/", Some("tok"));
        service.ready().await.unwrap().call(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_header_without_token() {
        let mut service = layer().layer(CheckCsrfService { expected: None });
        let req = request(Method::POST, "http://localhost:8000/save/", None);
        service.ready().await.unwrap().call(req).await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_header_not_overwritten() {
        let mut service = layer().layer(CheckCsrfService {
            expected: Some(HeaderValue::from_static("caller")),
        });
        let mut req = request(Method::POST, "http://localhost:8000/save/", Some("tok"));
        req.headers_mut()
            .insert("x-csrftoken", HeaderValue::from_static("caller"));
        service.ready().await.unwrap().call(req).await.unwrap();
    }

    #[test]
    fn test_invalid_header_name() {
        let origin = url::Url::parse("http://localhost/").unwrap().origin();
        assert!(CsrfLayer::try_new("bad header", origin).is_err());
    }
}
