//! HTTP Client Abstraction
//!
//! Provides async HTTP operations and a `multipart/form-data` body builder
//! for upload endpoints.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON serialization failed: {}", e))
        })?;
        self.body = Some(Bytes::from(json));
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Attach an encoded multipart form as the request body.
    pub fn multipart(mut self, form: MultipartForm) -> Self {
        let content_type = form.content_type();
        self.body = Some(form.into_body());
        self.headers.insert("Content-Type".to_string(), content_type);
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

#[derive(Debug, Clone)]
enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime_type: String,
        data: Bytes,
    },
}

/// `multipart/form-data` body builder
///
/// Parts are encoded in insertion order. The boundary is random per form.
///
/// ```ignore
/// let form = MultipartForm::new()
///     .text("userId", "42")
///     .file("file", "a.jpg", "image/jpeg", bytes);
/// let request = HttpRequest::new(HttpMethod::Post, url).multipart(form);
/// ```
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<FormPart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self {
            boundary: format!("----mbc-{}", uuid::Uuid::new_v4().simple()),
            parts: Vec::new(),
        }
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Bytes,
    ) -> Self {
        self.parts.push(FormPart::File {
            name: name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data,
        });
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Names of the parts, in encoding order.
    pub fn field_names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .map(|part| match part {
                FormPart::Text { name, .. } | FormPart::File { name, .. } => name.as_str(),
            })
            .collect()
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn into_body(self) -> Bytes {
        let mut buf = BytesMut::new();
        for part in self.parts {
            buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match part {
                FormPart::Text { name, value } => {
                    buf.put_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    buf.put_slice(value.as_bytes());
                }
                FormPart::File {
                    name,
                    file_name,
                    mime_type,
                    data,
                } => {
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            name, file_name
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
                    buf.put_slice(&data);
                }
            }
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        buf.freeze()
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Parse response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON deserialization failed: {}", e))
        })
    }

    /// Get response body as UTF-8 string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Check if response status indicates a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Async HTTP client trait
///
/// Implementations perform exactly one attempt per call. Retrying is a policy
/// decision left to callers.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest, HttpMethod};
///
/// async fn ping(client: &dyn HttpClient) -> Result<bool> {
///     let request = HttpRequest::new(HttpMethod::Get, "https://api.example.com/health");
///     Ok(client.execute(request).await?.is_success())
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - TLS validation fails
    /// - Request times out ([`BridgeError::Timeout`])
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::new(HttpMethod::Get, "https://example.com")
            .header("User-Agent", "test")
            .bearer_token("secret")
            .timeout(Duration::from_secs(30));

        assert_eq!(request.url, "https://example.com");
        assert_eq!(request.headers.get("User-Agent"), Some(&"test".to_string()));
        assert!(request.headers.contains_key("Authorization"));
    }

    #[test]
    fn test_http_response_status_checks() {
        let response = HttpResponse {
            status: 201,
            headers: HashMap::new(),
            body: Bytes::from("ok"),
        };
        assert!(response.is_success());
        assert!(!response.is_server_error());

        let response = HttpResponse {
            status: 503,
            headers: HashMap::new(),
            body: Bytes::new(),
        };
        assert!(!response.is_success());
        assert!(response.is_server_error());
    }

    #[test]
    fn test_multipart_encoding() {
        let form = MultipartForm::new()
            .text("userId", "42")
            .file("file", "a.jpg", "image/jpeg", Bytes::from_static(b"\xff\xd8"));
        let boundary = form.boundary().to_string();
        assert_eq!(form.field_names(), vec!["userId", "file"]);

        let request = HttpRequest::new(HttpMethod::Post, "https://example.com/upload")
            .multipart(form);
        let content_type = request.headers.get("Content-Type").cloned().unwrap();
        assert!(content_type.ends_with(&boundary));

        let body = request.body.unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with(&format!("--{}\r\n", boundary)));
        assert!(text.contains("name=\"userId\"\r\n\r\n42\r\n"));
        assert!(text.contains("filename=\"a.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with(&format!("--{}--\r\n", boundary)));
    }

    #[test]
    fn test_multipart_boundaries_differ() {
        assert_ne!(
            MultipartForm::new().boundary(),
            MultipartForm::new().boundary()
        );
    }
}
