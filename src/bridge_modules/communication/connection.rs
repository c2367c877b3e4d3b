use crate::bridge_modules::error::ConnectionError;
use std::collections::BTreeMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake request for `url` carrying the configured extra headers.
pub fn build_request(
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<Request, ConnectionError> {
    let mut request = url.into_client_request()?;

    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConnectionError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| ConnectionError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        request.headers_mut().insert(header_name, header_value);
    }

    Ok(request)
}

pub async fn connect(
    url: &str,
    headers: &BTreeMap<String, String>,
) -> Result<WsStream, ConnectionError> {
    let request = build_request(url, headers)?;
    info!(url = %url, extra_headers = headers.len(), "Connecting to WebSocket URL");
    let (ws_stream, response) = tokio_tungstenite::connect_async(request).await?;
    info!(status = %response.status(), "Successfully connected to WebSocket endpoint.");
    Ok(ws_stream)
}
