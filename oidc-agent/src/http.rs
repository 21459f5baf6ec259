//! A thin HTTPS client for talking to IdPs
//!
//! The [`HttpClient`] wraps an arbitrary [tower](`Service`) stack behind a
//! cheaply clonable buffer, so the flow engine can run against the real
//! hyper + rustls stack in production and against `tower_test` mocks in
//! tests.

use std::path::Path;

use http::{Request, Response, StatusCode};
use hyper::{client::HttpConnector, Body};
use tower::{buffer::Buffer, util::BoxService, BoxError, Service, ServiceExt};

use crate::{Error, Result};

/// Client for performing the agent's outbound IdP requests.
#[derive(Clone)]
pub struct HttpClient {
    // - `Buffer` for cheap clone
    // - `BoxService` for dynamic inner service type
    inner: Buffer<BoxService<Request<Body>, Response<Body>, BoxError>, Request<Body>>,
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

impl HttpClient {
    /// Create an [`HttpClient`] from a custom `Service` stack.
    ///
    /// Production callers want [`HttpClient::try_default`]; this
    /// constructor exists so tests can plug in `tower_test::mock::pair`.
    pub fn new<S>(service: S) -> Self
    where
        S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
    {
        Self {
            inner: Buffer::new(BoxService::new(service.map_err(|e| e.into())), 1024),
        }
    }

    /// Create a client trusting the system's native root certificates.
    pub fn try_default() -> Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_only()
            .enable_http1()
            .build();
        Ok(Self::new(hyper::Client::builder().build::<_, Body>(https)))
    }

    /// Create a client trusting only the PEM CA bundle at `path`.
    ///
    /// Used for accounts carrying a `cert_path` override.
    pub fn with_ca_bundle(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path).map_err(|source| {
            crate::error::StoreError::ReadFile {
                path: path.to_owned(),
                source,
            }
        })?;
        let mut reader = std::io::Cursor::new(pem);
        let certs = rustls_pemfile::certs(&mut reader).map_err(|source| {
            crate::error::StoreError::ReadFile {
                path: path.to_owned(),
                source,
            }
        })?;
        let mut root_store = rustls::RootCertStore::empty();
        root_store.add_parsable_certificates(&certs);
        let config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let https: HttpsConnector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(config)
            .https_only()
            .enable_http1()
            .build();
        Ok(Self::new(hyper::Client::builder().build::<_, Body>(https)))
    }

    /// Perform a raw HTTP request and return the raw response.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>> {
        let mut svc = self.inner.clone();
        let res = svc
            .ready()
            .await
            .map_err(Error::Service)?
            .call(request)
            .await
            .map_err(|err| {
                err.downcast::<hyper::Error>()
                    .map(|err| Error::HyperError(*err))
                    .unwrap_or_else(Error::Service)
            })?;
        Ok(res)
    }

    /// Perform a request and collect the response body as text.
    pub async fn request_text(&self, request: Request<Body>) -> Result<(StatusCode, String)> {
        let res = self.send(request).await?;
        let status = res.status();
        let body_bytes = hyper::body::to_bytes(res.into_body())
            .await
            .map_err(Error::HyperError)?;
        let text = String::from_utf8(body_bytes.to_vec()).map_err(Error::FromUtf8)?;
        Ok((status, text))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::pin_mut;
    use tower_test::mock;

    #[tokio::test]
    async fn send_routes_through_the_service() {
        let (mock_service, handle) = mock::pair::<Request<Body>, Response<Body>>();
        let spawned = tokio::spawn(async move {
            pin_mut!(handle);
            let (request, send) = handle.next_request().await.expect("service not called");
            assert_eq!(request.uri().to_string(), "https://idp.example/probe");
            send.send_response(Response::builder().body(Body::from("ok")).unwrap());
        });

        let client = HttpClient::new(mock_service);
        let req = Request::builder()
            .uri("https://idp.example/probe")
            .body(Body::empty())
            .unwrap();
        let (status, text) = client.request_text(req).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "ok");
        spawned.await.unwrap();
    }
}
