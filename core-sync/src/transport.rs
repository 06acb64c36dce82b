//! # Transport Stage
//!
//! Delivers one prepared payload to the upload endpoint as a
//! `multipart/form-data` POST:
//!
//! | Field        | Value                                   |
//! |--------------|-----------------------------------------|
//! | `userId`     | configured user id                      |
//! | `itemId`     | stable media item id                    |
//! | `capturedAt` | `YYYY:MM:DD HH:mm:ss` (UTC)             |
//! | `latitude`   | decimal degrees, only when geo is known |
//! | `longitude`  | decimal degrees, only when geo is known |
//! | `file`       | payload bytes                           |
//!
//! Each request is attempted once with a deadline. The endpoint is expected
//! to be idempotent per `(userId, itemId)`, so a later run may safely resend.

use crate::config::SyncConfig;
use crate::error::TransportError;
use crate::transform::PreparedUpload;
use bridge_traits::{HttpClient, HttpMethod, HttpRequest, MediaItem, MultipartForm};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Optional acknowledgement body. Endpoints that answer 2xx with
/// `{"success": false}` did not accept the upload.
#[derive(Debug, Deserialize)]
struct UploadAck {
    success: Option<bool>,
}

pub struct UploadTransport {
    http_client: Arc<dyn HttpClient>,
    endpoint_url: String,
    user_id: String,
    timeout: Duration,
}

impl UploadTransport {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        endpoint_url: impl Into<String>,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http_client,
            endpoint_url: endpoint_url.into(),
            user_id: user_id.into(),
            timeout,
        }
    }

    pub fn from_config(http_client: Arc<dyn HttpClient>, config: &SyncConfig) -> Self {
        Self::new(
            http_client,
            config.endpoint_url.clone(),
            config.user_id.clone(),
            config.upload_timeout,
        )
    }

    /// Builds the multipart body for one item.
    pub fn form(
        &self,
        item: &MediaItem,
        prepared: &PreparedUpload,
        payload: Bytes,
    ) -> MultipartForm {
        let mut form = MultipartForm::new()
            .text("userId", self.user_id.as_str())
            .text("itemId", item.id.as_str())
            .text("capturedAt", prepared.captured_at.as_str());

        if let Some(geo) = item.geo {
            form = form
                .text("latitude", geo.latitude.to_string())
                .text("longitude", geo.longitude.to_string());
        }

        form.file("file", prepared.file_name.as_str(), prepared.mime_type.as_str(), payload)
    }

    /// Sends the payload. A single attempt; the caller decides about retries.
    pub async fn send(
        &self,
        item: &MediaItem,
        prepared: &PreparedUpload,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let request = HttpRequest::new(HttpMethod::Post, self.endpoint_url.as_str())
            .multipart(self.form(item, prepared, payload))
            .timeout(self.timeout);

        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            return Err(TransportError::Rejected {
                status: response.status,
            });
        }

        if let Ok(UploadAck {
            success: Some(false),
        }) = serde_json::from_slice::<UploadAck>(&response.body)
        {
            return Err(TransportError::NotAcknowledged);
        }

        debug!(item_id = %item.id, status = response.status, "Upload accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::PayloadSource;
    use async_trait::async_trait;
    use bridge_traits::error::Result;
    use bridge_traits::{BridgeError, GeoPoint, HttpResponse};
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn response(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    fn prepared() -> PreparedUpload {
        PreparedUpload {
            file_name: "IMG_1.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            captured_at: "2024:03:09 07:05:03".to_string(),
            source: PayloadSource::Inline(Bytes::from_static(b"jpeg")),
        }
    }

    fn transport(http: MockHttpClient) -> UploadTransport {
        UploadTransport::new(
            Arc::new(http),
            "https://backup.example.com/upload",
            "user-7",
            Duration::from_secs(30),
        )
    }

    async fn send_with(
        http: MockHttpClient,
        item: &MediaItem,
    ) -> std::result::Result<(), TransportError> {
        transport(http)
            .send(item, &prepared(), Bytes::from_static(b"jpeg"))
            .await
    }

    #[test]
    fn test_form_fields() {
        let item = MediaItem::new("IMG_1", 1, "image/jpeg", "IMG_1.jpg")
            .with_geo(GeoPoint::new(48.85, 2.35));
        let form = transport(MockHttpClient::new()).form(&item, &prepared(), Bytes::new());

        assert_eq!(
            form.field_names(),
            ["userId", "itemId", "capturedAt", "latitude", "longitude", "file"]
        );

        let body = String::from_utf8_lossy(&form.into_body()).to_string();
        assert!(body.contains("user-7"));
        assert!(body.contains("2024:03:09 07:05:03"));
        assert!(body.contains("48.85"));
        assert!(body.contains("filename=\"IMG_1.jpg\""));
    }

    #[test]
    fn test_form_without_geo() {
        let item = MediaItem::new("IMG_2", 1, "image/jpeg", "IMG_2.jpg");
        let form = transport(MockHttpClient::new()).form(&item, &prepared(), Bytes::new());
        assert_eq!(form.field_names(), ["userId", "itemId", "capturedAt", "file"]);
    }

    #[tokio::test]
    async fn test_success_posts_multipart_with_timeout() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .withf(|request| {
                request.method == HttpMethod::Post
                    && request.url == "https://backup.example.com/upload"
                    && request.timeout == Some(Duration::from_secs(30))
                    && request
                        .headers
                        .get("Content-Type")
                        .is_some_and(|ct| ct.starts_with("multipart/form-data; boundary="))
            })
            .times(1)
            .returning(|_| Ok(response(201, r#"{"success": true, "id": "srv-1"}"#)));

        let item = MediaItem::new("IMG_1", 1, "image/jpeg", "IMG_1.jpg");
        assert!(send_with(http, &item).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_or_plain_body_is_accepted() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(200, "OK")));

        let item = MediaItem::new("IMG_1", 1, "image/jpeg", "IMG_1.jpg");
        assert!(send_with(http, &item).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_2xx_is_rejected() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(503, "")));

        let item = MediaItem::new("IMG_1", 1, "image/jpeg", "IMG_1.jpg");
        assert_eq!(
            send_with(http, &item).await,
            Err(TransportError::Rejected { status: 503 })
        );
    }

    #[tokio::test]
    async fn test_negative_ack() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Ok(response(200, r#"{"success": false, "error": "quota"}"#)));

        let item = MediaItem::new("IMG_1", 1, "image/jpeg", "IMG_1.jpg");
        assert_eq!(send_with(http, &item).await, Err(TransportError::NotAcknowledged));
    }

    #[tokio::test]
    async fn test_timeout_and_network_errors() {
        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::Timeout("deadline".into())));
        let item = MediaItem::new("IMG_1", 1, "image/jpeg", "IMG_1.jpg");
        assert_eq!(send_with(http, &item).await, Err(TransportError::Timeout));

        let mut http = MockHttpClient::new();
        http.expect_execute()
            .times(1)
            .returning(|_| Err(BridgeError::OperationFailed("connection reset".into())));
        assert!(matches!(
            send_with(http, &item).await,
            Err(TransportError::Network(_))
        ));
    }
}
