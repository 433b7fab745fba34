// ── Transaction forwarder ──
//
// Delivers one websocket transaction to the local appservice as
// `PUT /_matrix/app/v1/transactions/{txnId}`. Sends exactly once per
// call; retries belong to the server side, which redelivers anything
// it never saw acknowledged.

use bbctl_api::{Transaction, TransactionAck};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{error, info};
use url::Url;

use crate::error::CoreError;

/// Matrix-style error body (`{"errcode": ..., "error": ...}`).
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

pub struct TransactionForwarder {
    client: reqwest::Client,
    base_url: Url,
    hs_token: SecretString,
}

impl TransactionForwarder {
    pub fn new(client: reqwest::Client, base_url: Url, hs_token: SecretString) -> Self {
        Self {
            client,
            base_url,
            hs_token,
        }
    }

    /// Full transaction URL, with the id percent-encoded as one segment.
    pub fn transaction_url(&self, txn_id: &str) -> Result<Url, CoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| CoreError::Config {
                message: format!("local appservice URL {} cannot be a base", self.base_url),
            })?
            .pop_if_empty()
            .extend(["_matrix", "app", "v1", "transactions", txn_id]);
        Ok(url)
    }

    /// PUT the transaction body and return the acknowledgement on 2xx.
    pub async fn forward(&self, txn: &Transaction) -> Result<TransactionAck, CoreError> {
        info!(
            txn_id = %txn.txn_id,
            events = txn.event_count(),
            "Forwarding transaction"
        );
        let url = self.transaction_url(&txn.txn_id)?;

        let response = self
            .client
            .put(url)
            .bearer_auth(self.hs_token.expose_secret())
            .json(&txn.body)
            .send()
            .await
            .map_err(|e| {
                error!(txn_id = %txn.txn_id, error = %e, "Failed to send transaction request");
                CoreError::LocalRequest(e)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(TransactionAck {
                txn_id: txn.txn_id.clone(),
            });
        }

        let status_code = status.as_u16();
        let body = response.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => {
                error!(
                    txn_id = %txn.txn_id,
                    status_code,
                    errcode = %err.errcode,
                    error = %err.error,
                    "Got error response sending transaction"
                );
                Err(CoreError::TransactionRejected {
                    status: status_code,
                    errcode: err.errcode,
                    error: err.error,
                })
            }
            Err(e) => {
                error!(
                    txn_id = %txn.txn_id,
                    status_code,
                    json_decode_err = %e,
                    "Got non-JSON error response sending transaction"
                );
                Err(CoreError::NonJsonErrorResponse {
                    status: status_code,
                })
            }
        }
    }
}
