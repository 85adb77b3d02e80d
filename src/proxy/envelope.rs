//! Forwardable request envelopes and the request duplicator.
//!
//! [`buffer`] reads an inbound request body to completion in one pass and
//! wraps it with the request metadata in a [`RequestEnvelope`].
//! [`duplicate`] does the same and forks the result into two envelopes,
//! one per backend. Each envelope owns its header map and its own handle
//! on the body bytes, so a host rewrite or a body read on one copy is
//! never visible through the other.
//!
//! The whole body is held in memory before either forward begins; the
//! `max_body` limit is the only bound.

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, HOST};
use http::{HeaderMap, HeaderValue, Method, Request, Uri, Version};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;

use crate::error::DuplicationError;

#[derive(Debug)]
pub struct RequestEnvelope {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub host: Option<HeaderValue>,
    pub content_length: Option<u64>,
    /// The client asked for the connection to be closed after this exchange.
    ///
    /// Informational: logged with the forward. The client's own `Connection`
    /// header travels unchanged and every backend connection already ends
    /// after one exchange, so nothing is added to the outgoing request.
    pub close: bool,
}

impl RequestEnvelope {
    #[must_use]
    pub fn new(parts: http::request::Parts, body: Bytes) -> Self {
        let host = parts.headers.get(HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let close = wants_close(parts.version, &parts.headers);

        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            host,
            content_length,
            close,
        }
    }

    /// Independent copy: metadata by value, a freshly built header map, and
    /// a separate handle on the immutable body bytes.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            method: self.method.clone(),
            uri: self.uri.clone(),
            version: self.version,
            headers: self.headers.clone(),
            body: self.body.clone(),
            host: self.host.clone(),
            content_length: self.content_length,
            close: self.close,
        }
    }

    /// Point the host field at the backend. Affects this envelope only.
    pub fn rewrite_host(&mut self, address: &str) {
        match HeaderValue::from_str(address) {
            Ok(value) => self.host = Some(value),
            Err(e) => {
                tracing::warn!(address, error = %e, "backend address is not a valid host header");
            }
        }
    }

    /// Host the backend will see, for logging.
    #[must_use]
    pub fn host_str(&self) -> &str {
        self.host
            .as_ref()
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
    }

    /// Build the outbound request. Headers keep their order; only the host
    /// header is replaced, in place, by the envelope's host field.
    #[must_use]
    pub fn into_request(self) -> Request<Full<Bytes>> {
        let mut req = Request::new(Full::new(self.body));
        *req.method_mut() = self.method;
        *req.uri_mut() = self.uri;
        *req.version_mut() = self.version;
        *req.headers_mut() = self.headers;
        if let Some(host) = self.host {
            req.headers_mut().insert(HOST, host);
        }
        req
    }
}

fn wants_close(version: Version, headers: &HeaderMap) -> bool {
    let has_token = |token: &str| {
        headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    };
    match version {
        Version::HTTP_10 | Version::HTTP_09 => !has_token("keep-alive"),
        _ => has_token("close"),
    }
}

/// Read the inbound body to completion and wrap it in an envelope.
pub async fn buffer<B>(
    req: Request<B>,
    max_body: usize,
) -> Result<RequestEnvelope, DuplicationError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let collected = Limited::new(body, max_body).collect().await.map_err(|e| {
        if e.downcast_ref::<LengthLimitError>().is_some() {
            DuplicationError::TooLarge { limit: max_body }
        } else {
            DuplicationError::Body { source: e }
        }
    })?;
    Ok(RequestEnvelope::new(parts, collected.to_bytes()))
}

/// Split one inbound request into `(primary, shadow)` envelopes. Fails
/// without producing either copy if the body cannot be read completely.
pub async fn duplicate<B>(
    req: Request<B>,
    max_body: usize,
) -> Result<(RequestEnvelope, RequestEnvelope), DuplicationError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let primary = buffer(req, max_body).await?;
    let shadow = primary.fork();
    Ok((primary, shadow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Buf;
    use hyper::body::Frame;

    fn request(body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method("POST")
            .uri("/orders?id=7")
            .header("host", "shop.example")
            .header("content-length", body.len().to_string())
            .header("x-trace", "a")
            .header("x-trace", "b")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    #[tokio::test]
    async fn both_copies_get_identical_body() {
        let (a, b) = duplicate(request("hello"), 1024).await.unwrap();
        assert_eq!(a.body, Bytes::from_static(b"hello"));
        assert_eq!(a.body, b.body);
    }

    #[tokio::test]
    async fn reading_one_body_leaves_the_other_intact() {
        let (mut a, b) = duplicate(request("hello world"), 1024).await.unwrap();
        let mut drained = Vec::new();
        while a.body.has_remaining() {
            let chunk = a.body.chunk().to_vec();
            a.body.advance(chunk.len());
            drained.extend(chunk);
        }
        assert_eq!(drained, b"hello world");
        assert!(a.body.is_empty());
        assert_eq!(b.body, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn header_maps_are_independent() {
        let (mut a, b) = duplicate(request("x"), 1024).await.unwrap();
        a.headers.insert("x-only-a", HeaderValue::from_static("1"));
        a.headers.remove("x-trace");
        a.rewrite_host("primary:8080");

        assert!(b.headers.get("x-only-a").is_none());
        assert_eq!(b.headers.get_all("x-trace").iter().count(), 2);
        assert_eq!(b.host_str(), "shop.example");
        assert_eq!(a.host_str(), "primary:8080");
    }

    #[tokio::test]
    async fn metadata_copied_by_value() {
        let (a, b) = duplicate(request("hello"), 1024).await.unwrap();
        for env in [&a, &b] {
            assert_eq!(env.method, Method::POST);
            assert_eq!(env.uri, "/orders?id=7");
            assert_eq!(env.version, Version::HTTP_11);
            assert_eq!(env.content_length, Some(5));
            assert_eq!(env.host_str(), "shop.example");
            assert!(!env.close);
        }
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let err = duplicate(request("0123456789"), 4).await.unwrap_err();
        assert!(matches!(err, DuplicationError::TooLarge { limit: 4 }));
    }

    /// Yields one data frame, then fails like a reset client connection.
    struct BrokenBody {
        sent: bool,
    }

    impl Body for BrokenBody {
        type Data = Bytes;
        type Error = std::io::Error;

        fn poll_frame(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
            if self.sent {
                return std::task::Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "reset",
                ))));
            }
            self.sent = true;
            std::task::Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"partial")))))
        }
    }

    #[tokio::test]
    async fn body_read_error_produces_no_envelopes() {
        let req = Request::builder()
            .uri("/")
            .body(BrokenBody { sent: false })
            .unwrap();

        let err = duplicate(req, 1024).await.unwrap_err();
        assert!(matches!(err, DuplicationError::Body { .. }));
    }

    #[test]
    fn into_request_replaces_host_in_place() {
        let parts = request("").into_parts().0;
        let mut env = RequestEnvelope::new(parts, Bytes::new());
        env.rewrite_host("backend:9000");
        let req = env.into_request();

        let names: Vec<_> = req.headers().keys().map(|k| k.as_str()).collect();
        assert_eq!(names, ["host", "content-length", "x-trace"]);
        assert_eq!(req.headers()["host"], "backend:9000");
        assert_eq!(req.headers().get_all("host").iter().count(), 1);
    }

    #[test]
    fn into_request_never_adds_connection_header() {
        let parts = request("").into_parts().0;
        let env = RequestEnvelope::new(parts, Bytes::new());
        assert!(!env.close);
        assert!(env.into_request().headers().get(CONNECTION).is_none());

        let parts = Request::builder()
            .version(Version::HTTP_10)
            .uri("/")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let env = RequestEnvelope::new(parts, Bytes::new());
        assert!(env.close);
        assert!(env.into_request().headers().get(CONNECTION).is_none());

        let parts = Request::builder()
            .uri("/")
            .header(CONNECTION, "close")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let env = RequestEnvelope::new(parts, Bytes::new());
        assert!(env.close);
        let req = env.into_request();
        assert_eq!(req.headers().get_all(CONNECTION).iter().count(), 1);
        assert_eq!(req.headers()[CONNECTION], "close");
    }

    #[test]
    fn close_flag_follows_version_rules() {
        let mut headers = HeaderMap::new();
        assert!(wants_close(Version::HTTP_10, &headers));
        assert!(!wants_close(Version::HTTP_11, &headers));

        headers.insert(CONNECTION, HeaderValue::from_static("Keep-Alive"));
        assert!(!wants_close(Version::HTTP_10, &headers));

        headers.insert(CONNECTION, HeaderValue::from_static("upgrade, close"));
        assert!(wants_close(Version::HTTP_11, &headers));
    }

    #[test]
    fn host_falls_back_to_absolute_uri() {
        let (parts, ()) = Request::builder()
            .uri("http://origin.example:81/x")
            .body(())
            .unwrap()
            .into_parts();
        let env = RequestEnvelope::new(parts, Bytes::new());
        assert_eq!(env.host_str(), "origin.example:81");
    }
}
