// ── HTTP tunnel executor ──
//
// Executes an `http_proxy` request against the local appservice and
// packs the response for the JSON-only websocket. A failure to reach the
// appservice is an error; any HTTP response, including 4xx/5xx, is a
// successful proxied outcome.

use std::collections::BTreeMap;

use bbctl_api::protocol::{canonical_header_name, encode_proxy_body};
use bbctl_api::{HttpProxyRequest, HttpProxyResponse};
use reqwest::header::{CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::CoreError;

pub struct HttpTunnel {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTunnel {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// `{base}{path}?{query}`, with the base path kept as a prefix.
    pub fn target_url(&self, path: &str, query: &str) -> Url {
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(if query.is_empty() { None } else { Some(query) });
        url
    }

    /// Run one proxied request. The inner request is always a PUT.
    ///
    /// `cancel` is the per-request context; cancelling it abandons the
    /// call and returns [`CoreError::Cancelled`].
    pub async fn execute(
        &self,
        request: HttpProxyRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpProxyResponse, CoreError> {
        let url = self.target_url(&request.path, &request.query);
        let headers = request_headers(&request.headers)?;
        let body = request
            .body
            .map(|raw| raw.get().to_owned())
            .unwrap_or_default();
        debug!(url = %url, "Proxying HTTP request");

        let send = self.client.put(url).headers(headers).body(body).send();
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            response = send => response?,
        };

        let status = response.status().as_u16();
        let headers = response_headers(response.headers());
        let bytes = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(CoreError::Cancelled),
            bytes = response.bytes() => bytes?,
        };
        let body = encode_proxy_body(&bytes)
            .map_err(|e| CoreError::Internal(format!("failed to encode proxied body: {e}")))?;

        debug!(status, body_len = bytes.len(), "Proxied HTTP request completed");
        Ok(HttpProxyResponse {
            status,
            headers,
            body,
        })
    }
}

/// Copy headers verbatim, minus the ones the HTTP client computes itself.
fn request_headers(headers: &BTreeMap<String, Vec<String>>) -> Result<HeaderMap, CoreError> {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            CoreError::InvalidProxyRequest {
                message: format!("invalid header name {name:?}: {e}"),
            }
        })?;
        if name == HOST || name == CONTENT_LENGTH {
            continue;
        }
        for value in values {
            let value = HeaderValue::from_str(value).map_err(|e| CoreError::InvalidProxyRequest {
                message: format!("invalid value for header {name}: {e}"),
            })?;
            map.append(name.clone(), value);
        }
    }
    Ok(map)
}

fn response_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        out.entry(canonical_header_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}
