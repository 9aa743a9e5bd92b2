//! HTTP transport used by every vendor client.
//!
//! The trait keeps the vendor protocols independent of `reqwest` so the
//! protocol code can be driven by scripted responses in tests.

use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::error::{IptvError, Result};

/// Maximum redirect hops followed when resolving a URL
const MAX_REDIRECTS: usize = 10;
/// Characters of an unparseable body written to the debug log
const LOGGED_BODY_CHARS: usize = 500;

/// Request payload
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    pub fn form<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        RequestBody::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Status and raw body of a vendor response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Reject non-2xx answers. 401/403 become authentication failures.
    pub fn error_for_status(self) -> Result<Self> {
        match self.status {
            401 | 403 => Err(IptvError::authentication(Some(self.status), self.body)),
            _ if !self.is_success() => Err(IptvError::vendor(Some(self.status), self.body)),
            _ => Ok(self),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            debug!(
                "Unparseable vendor response: {}",
                self.body.chars().take(LOGGED_BODY_CHARS).collect::<String>()
            );
            IptvError::vendor(Some(self.status), format!("{}: {}", e, self.body))
        })
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse>;

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &RequestBody,
    ) -> Result<HttpResponse>;

    /// Follow redirects and return the final URL without reading the body
    async fn get_resolved_url(&self, url: &str, headers: &[(&str, &str)]) -> Result<String>;

    /// POST, follow the redirect chain and return the final URL
    async fn post_resolved_url(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &RequestBody,
    ) -> Result<String>;
}

/// `reqwest` backed transport
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout_ms: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(user_agent)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .build()
            .map_err(|e| IptvError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http })
    }

    fn prepare(builder: RequestBuilder, headers: &[(&str, &str)], body: Option<&RequestBody>) -> RequestBuilder {
        let mut builder = headers
            .iter()
            .fold(builder, |builder, (name, value)| builder.header(*name, *value));

        builder = match body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Form(pairs)) => builder.form(pairs),
            None => builder,
        };

        builder
    }

    async fn send(&self, url: &str, builder: RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| map_reqwest_error(url, e))
    }

    async fn read(url: &str, response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| map_reqwest_error(url, e))?;
        debug!(url = %url, status = status, bytes = body.len(), msg = "Vendor response");
        Ok(HttpResponse { status, body })
    }
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> IptvError {
    if err.is_timeout() {
        IptvError::Timeout(url.to_string())
    } else {
        IptvError::Network(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        let request = Self::prepare(self.http.get(url), headers, None);
        let response = self.send(url, request).await?;
        Self::read(url, response).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &RequestBody,
    ) -> Result<HttpResponse> {
        let request = Self::prepare(self.http.post(url), headers, Some(body));
        let response = self.send(url, request).await?;
        Self::read(url, response).await
    }

    async fn get_resolved_url(&self, url: &str, headers: &[(&str, &str)]) -> Result<String> {
        let request = Self::prepare(self.http.get(url), headers, None);
        let response = self.send(url, request).await?;
        Ok(response.url().to_string())
    }

    async fn post_resolved_url(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &RequestBody,
    ) -> Result<String> {
        let request = Self::prepare(self.http.post(url), headers, Some(body));
        let response = self.send(url, request).await?;
        Ok(response.url().to_string())
    }
}

// ============================================================================
// Scripted transport for tests
// ============================================================================

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Method {
        Get,
        Post,
        ResolveGet,
        ResolvePost,
    }

    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub method: Method,
        pub url: String,
        pub body: Option<RequestBody>,
    }

    impl RecordedRequest {
        pub fn json(&self) -> Option<&serde_json::Value> {
            match &self.body {
                Some(RequestBody::Json(value)) => Some(value),
                _ => None,
            }
        }

        /// Compact JSON text of the body, handy for substring assertions
        pub fn body_text(&self) -> String {
            match &self.body {
                Some(RequestBody::Json(value)) => value.to_string(),
                Some(RequestBody::Form(pairs)) => pairs
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("&"),
                None => String::new(),
            }
        }
    }

    type Responder = Box<dyn Fn(&RecordedRequest) -> Result<HttpResponse> + Send + Sync>;

    /// Answers every request through a closure and records what was asked.
    /// For the `Resolve*` methods the response body is the resolved URL.
    pub struct ScriptedTransport {
        responder: Responder,
        calls: Mutex<Vec<RecordedRequest>>,
    }

    impl ScriptedTransport {
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&RecordedRequest) -> Result<HttpResponse> + Send + Sync + 'static,
        {
            Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<RecordedRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count_matching(&self, needle: &str) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.url.contains(needle) || call.body_text().contains(needle))
                .count()
        }

        fn answer(&self, method: Method, url: &str, body: Option<&RequestBody>) -> Result<HttpResponse> {
            let request = RecordedRequest {
                method,
                url: url.to_string(),
                body: body.cloned(),
            };
            self.calls.lock().unwrap().push(request.clone());
            (self.responder)(&request)
        }
    }

    pub fn ok_json(value: serde_json::Value) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: value.to_string(),
        })
    }

    pub fn ok_text(body: &str) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Result<HttpResponse> {
            self.answer(Method::Get, url, None)
        }

        async fn post(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            body: &RequestBody,
        ) -> Result<HttpResponse> {
            self.answer(Method::Post, url, Some(body))
        }

        async fn get_resolved_url(&self, url: &str, _headers: &[(&str, &str)]) -> Result<String> {
            self.answer(Method::ResolveGet, url, None).map(|r| r.body)
        }

        async fn post_resolved_url(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            body: &RequestBody,
        ) -> Result<String> {
            self.answer(Method::ResolvePost, url, Some(body)).map(|r| r.body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        let unauthorized = HttpResponse {
            status: 401,
            body: "nope".to_string(),
        };
        assert!(matches!(
            unauthorized.error_for_status(),
            Err(IptvError::Authentication { status: Some(401), .. })
        ));

        let server_error = HttpResponse {
            status: 502,
            body: "bad gateway".to_string(),
        };
        match server_error.error_for_status() {
            Err(IptvError::VendorApi { status, payload }) => {
                assert_eq!(status, Some(502));
                assert_eq!(payload, "bad gateway");
            }
            other => panic!("unexpected: {other:?}"),
        }

        let ok = HttpResponse {
            status: 204,
            body: String::new(),
        };
        assert!(ok.error_for_status().is_ok());
    }

    #[test]
    fn test_json_parse_error_keeps_payload() {
        let response = HttpResponse {
            status: 200,
            body: "<html>maintenance</html>".to_string(),
        };
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(err.to_string().contains("maintenance"));
    }

    #[test]
    fn test_json_parse_error_logs_multibyte_body() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let body = format!("a{}", "ě".repeat(300));
        let response = HttpResponse { status: 500, body: body.clone() };
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, IptvError::VendorApi { status: Some(500), .. }));
        assert!(err.to_string().ends_with(&body));
    }

    #[test]
    fn test_form_body() {
        let body = RequestBody::form([("grant_type", "authorization_code"), ("code", "abc")]);
        match body {
            RequestBody::Form(pairs) => {
                assert_eq!(pairs[0], ("grant_type".to_string(), "authorization_code".to_string()));
                assert_eq!(pairs.len(), 2);
            }
            RequestBody::Json(_) => panic!("expected a form body"),
        }
    }
}
