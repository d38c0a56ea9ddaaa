use std::sync::Arc;
use std::time::Duration;

use aws_lambda_events::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use aws_lambda_events::encodings::Body;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use lambda_runtime::{Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};

use crate::config::Config;
use crate::renderer::{PdfRenderer, RenderError};
use crate::storage::{self, ObjectStore, StorageError, PDF_CONTENT_TYPE};

pub const BAD_REQUEST_BODY: &str = "Invalid request body";
pub const INTERNAL_ERROR_BODY: &str = "Internal server error";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    #[serde(alias = "htmlS3Key")]
    pub html_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    pub pdf_url: String,
}

/// Download link for a freshly stored PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLink {
    pub key: String,
    pub url: String,
    pub expires_in: Duration,
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to parse request body: {0}")]
    InvalidRequest(#[from] serde_json::Error),
    #[error("htmlKey must not be empty")]
    EmptyKey,
    #[error("Failed to fetch HTML: {0}")]
    Fetch(#[source] StorageError),
    #[error("Failed to create PDF buffer from HTML: {0}")]
    Render(#[from] RenderError),
    #[error("Failed to upload PDF: {0}")]
    Upload(#[source] StorageError),
    #[error("Failed to sign PDF URL: {0}")]
    Sign(#[source] StorageError),
}

/// Runs the fetch → render → upload → sign pipeline against injected
/// storage and renderer implementations.
pub struct Converter {
    config: Config,
    store: Arc<dyn ObjectStore>,
    renderer: Arc<dyn PdfRenderer>,
}

impl Converter {
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        renderer: Arc<dyn PdfRenderer>,
    ) -> Self {
        Self {
            config,
            store,
            renderer,
        }
    }

    /// Turns a raw request body into the gateway response. Only an absent or
    /// empty body is a client error; every other failure is a 500 whose cause
    /// stays in the logs.
    pub async fn handle(&self, body: Option<&str>) -> ApiGatewayProxyResponse {
        let Some(body) = body.filter(|b| !b.is_empty()) else {
            error!("No request body provided");
            return text_response(400, BAD_REQUEST_BODY);
        };

        match self.convert(body).await {
            Ok(link) => {
                info!(
                    key = %link.key,
                    expires_in_secs = link.expires_in.as_secs(),
                    "generated presigned URL"
                );
                json_response(200, &ConversionResponse { pdf_url: link.url })
            }
            Err(e) => {
                error!(error = %e, "Error converting HTML to PDF");
                text_response(500, INTERNAL_ERROR_BODY)
            }
        }
    }

    pub async fn convert(&self, body: &str) -> Result<SignedLink, ConversionError> {
        let request: ConversionRequest = serde_json::from_str(body)?;
        if request.html_key.is_empty() {
            return Err(ConversionError::EmptyKey);
        }
        info!(html_key = %request.html_key, "parsed request body");

        let input_key = storage::input_key(&request.html_key);
        info!(bucket = %self.config.html_bucket, key = %input_key, "fetching HTML");
        let raw = self
            .store
            .get_object(&self.config.html_bucket, &input_key)
            .await
            .map_err(ConversionError::Fetch)?;
        let html = String::from_utf8_lossy(&raw);
        info!(bytes = raw.len(), "retrieved HTML content");

        let pdf = self.renderer.render(&html).await?;
        if pdf.is_empty() {
            return Err(ConversionError::Render(RenderError::EmptyOutput));
        }
        info!(bytes = pdf.len(), "generated PDF buffer");

        let output_key = storage::output_key(&request.html_key);
        info!(bucket = %self.config.pdf_bucket, key = %output_key, "uploading PDF");
        let stored = self
            .store
            .put_object(&self.config.pdf_bucket, &output_key, pdf, PDF_CONTENT_TYPE)
            .await
            .map_err(ConversionError::Upload)?;
        info!(bytes = stored.size, e_tag = ?stored.e_tag, "uploaded PDF");

        let url = self
            .store
            .presign_get(&self.config.pdf_bucket, &output_key, self.config.url_ttl)
            .await
            .map_err(ConversionError::Sign)?;

        Ok(SignedLink {
            key: output_key,
            url,
            expires_in: self.config.url_ttl,
        })
    }
}

pub async fn function_handler(
    event: LambdaEvent<ApiGatewayProxyRequest>,
    converter: &Converter,
) -> Result<ApiGatewayProxyResponse, Error> {
    let span = info_span!("convert", request_id = %event.context.request_id);
    let response = converter
        .handle(event.payload.body.as_deref())
        .instrument(span)
        .await;
    Ok(response)
}

fn text_response(status_code: i64, message: &str) -> ApiGatewayProxyResponse {
    response(status_code, "text/plain; charset=utf-8", message.to_string())
}

fn json_response<T: Serialize>(status_code: i64, payload: &T) -> ApiGatewayProxyResponse {
    match serde_json::to_string(payload) {
        Ok(body) => response(status_code, "application/json", body),
        Err(e) => {
            error!(error = %e, "Failed to serialize response");
            text_response(500, INTERNAL_ERROR_BODY)
        }
    }
}

fn response(status_code: i64, content_type: &'static str, body: String) -> ApiGatewayProxyResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    ApiGatewayProxyResponse {
        status_code,
        headers,
        body: Some(Body::Text(body)),
        is_base64_encoded: false,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChromeConfig;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl PdfRenderer for Unreachable {
        async fn render(&self, _html: &str) -> Result<Vec<u8>, RenderError> {
            panic!("renderer must not be called");
        }
    }

    fn converter(store: Arc<MemoryStore>) -> Converter {
        let config = Config {
            html_bucket: "docs".to_string(),
            pdf_bucket: "docs".to_string(),
            url_ttl: Duration::from_secs(3600),
            chrome: ChromeConfig::default(),
        };
        Converter::new(config, store, Arc::new(Unreachable))
    }

    fn body_text(response: &ApiGatewayProxyResponse) -> &str {
        match &response.body {
            Some(Body::Text(text)) => text,
            other => panic!("expected text body, got {other:?}"),
        }
    }

    #[test]
    fn request_accepts_legacy_field_name() {
        let request: ConversionRequest = serde_json::from_str(r#"{"htmlS3Key":"a"}"#).unwrap();
        assert_eq!(request.html_key, "a");
        let request: ConversionRequest = serde_json::from_str(r#"{"htmlKey":"b"}"#).unwrap();
        assert_eq!(request.html_key, "b");
    }

    #[test]
    fn success_body_uses_pdf_url_field() {
        let response = json_response(
            200,
            &ConversionResponse {
                pdf_url: "https://example.test/out/a.pdf".to_string(),
            },
        );
        assert_eq!(body_text(&response), r#"{"pdfUrl":"https://example.test/out/a.pdf"}"#);
        assert_eq!(response.headers[CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn absent_or_empty_body_is_bad_request() {
        let converter = converter(Arc::new(MemoryStore::new()));
        for body in [None, Some("")] {
            let response = converter.handle(body).await;
            assert_eq!(response.status_code, 400);
            assert_eq!(body_text(&response), BAD_REQUEST_BODY);
        }
    }

    #[tokio::test]
    async fn malformed_requests_are_internal_errors() {
        let converter = converter(Arc::new(MemoryStore::new()));
        for body in ["not json", "{}", r#"{"htmlKey":""}"#, r#"{"htmlKey":42}"#] {
            let response = converter.handle(Some(body)).await;
            assert_eq!(response.status_code, 500, "body {body:?}");
            assert_eq!(body_text(&response), INTERNAL_ERROR_BODY);
        }
    }

    #[tokio::test]
    async fn empty_key_is_reported_as_such() {
        let converter = converter(Arc::new(MemoryStore::new()));
        let err = converter.convert(r#"{"htmlKey":""}"#).await.unwrap_err();
        assert!(matches!(err, ConversionError::EmptyKey));
    }
}
