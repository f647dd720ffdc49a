use hyper::client::HttpConnector;
use hyper::{Client, StatusCode};
use hyper_tls::HttpsConnector;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

use crate::models::request::RequestConfig;

pub type HttpsClient = Client<HttpsConnector<HttpConnector>>;

pub fn build_client() -> HttpsClient {
    let https = HttpsConnector::new();
    Client::builder().build::<_, hyper::Body>(https)
}

/// A completed request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub status: StatusCode,
    /// Dispatch until the last body byte was received.
    pub latency: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection refused or host unreachable: {0}")]
    Connect(String),

    #[error("no complete response within {0:?}")]
    Timeout(Duration),

    #[error("connection closed unexpectedly")]
    Closed,

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("could not build request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Other(String),
}

impl TransportError {
    /// Key used in the status breakdown of the report.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Connect(_) => "CONNECT_ERROR",
            TransportError::Timeout(_) => "TIMEOUT",
            TransportError::Closed => "CONNECTION_CLOSED",
            TransportError::Body(_) => "BODY_ERROR",
            TransportError::InvalidRequest(_) => "REQUEST_ERROR",
            TransportError::Other(_) => "NETWORK_ERROR",
        }
    }

    fn from_hyper(e: hyper::Error) -> Self {
        if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_closed() || e.is_incomplete_message() {
            TransportError::Closed
        } else if e.is_timeout() {
            TransportError::Timeout(Duration::ZERO)
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Sends one request and reads the full response body.
///
/// `request_timeout` bounds the whole exchange, body included.
pub async fn send_request(
    client: &HttpsClient,
    request: &RequestConfig,
    request_timeout: Duration,
) -> Result<Exchange, TransportError> {
    let req = request
        .build()
        .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

    let start = Instant::now();
    let exchange = async move {
        let resp = client.request(req).await.map_err(TransportError::from_hyper)?;
        let status = resp.status();
        hyper::body::to_bytes(resp.into_body())
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok::<_, TransportError>(status)
    };

    match timeout(request_timeout, exchange).await {
        Ok(Ok(status)) => Ok(Exchange {
            status,
            latency: start.elapsed(),
        }),
        Ok(Err(TransportError::Timeout(_))) | Err(_) => {
            Err(TransportError::Timeout(request_timeout))
        }
        Ok(Err(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dsl_model::DslConfig;

    #[test]
    fn error_kinds_are_stable() {
        assert_eq!(TransportError::Connect("x".into()).kind(), "CONNECT_ERROR");
        assert_eq!(TransportError::Timeout(Duration::from_secs(1)).kind(), "TIMEOUT");
        assert_eq!(TransportError::Closed.kind(), "CONNECTION_CLOSED");
        assert_eq!(TransportError::Body("x".into()).kind(), "BODY_ERROR");
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_failure() {
        // Bind then drop to get a local port nothing listens on.
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let config = DslConfig::from_json(&format!(
            r#"{{ "target": "http://127.0.0.1:{port}/api/v1/product" }}"#
        ))
        .unwrap();
        let request = RequestConfig::from_dsl(&config).unwrap();

        let client = build_client();
        let result = send_request(&client, &request, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Connect(_))), "{result:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // Accept and hold the connection without answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = DslConfig::from_json(&format!(r#"{{ "target": "http://{addr}/" }}"#)).unwrap();
        let request = RequestConfig::from_dsl(&config).unwrap();
        let client = build_client();
        let result = send_request(&client, &request, Duration::from_millis(200)).await;
        assert_eq!(result, Err(TransportError::Timeout(Duration::from_millis(200))));
        server.abort();
    }
}
