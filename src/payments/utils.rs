use crate::payments::error::{PaymentError, PaymentResult};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use std::time::Duration;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration, max_retries: u32) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Sends a form-encoded request, retrying 429, 5xx and transport errors
    /// with exponential backoff. Every attempt reuses the same headers, so an
    /// `Idempotency-Key` makes retried writes safe.
    pub async fn request_form<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: Option<&str>,
        form: Option<&[(String, String)]>,
        additional_headers: &[(&str, &str)],
    ) -> PaymentResult<T> {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            let mut request = self.client.request(method.clone(), url);
            request = request.timeout(self.timeout);

            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }
            for (k, v) in additional_headers {
                request = request.header(*k, *v);
            }
            if let Some(params) = form {
                request = request.form(params);
            }

            let response = request
                .send()
                .await
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("processor request failed: {}", e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            PaymentError::processor(
                                format!("invalid processor JSON response: {}", e),
                                false,
                            )
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(PaymentError::RateLimitError {
                            message: "processor rate limit exceeded".to_string(),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "processor server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    let (message, code) = extract_error(&text);
                    if status.as_u16() == 402 {
                        return Err(PaymentError::PaymentDeclinedError {
                            message: message.unwrap_or_else(|| "payment declined".to_string()),
                            provider_code: code,
                        });
                    }
                    return Err(PaymentError::ProcessorError {
                        processor: "stripe".to_string(),
                        message: message.unwrap_or_else(|| format!("HTTP {}: {}", status, text)),
                        provider_code: code.or_else(|| Some(status.as_u16().to_string())),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(PaymentError::NetworkError {
            message: "processor request failed".to_string(),
        }))
    }
}

/// Pulls `error.message` and `error.decline_code`/`error.code` out of a
/// processor error envelope.
fn extract_error(body: &str) -> (Option<String>, Option<String>) {
    let Ok(json) = serde_json::from_str::<JsonValue>(body) else {
        return (None, None);
    };
    let error = &json["error"];
    let message = error["message"].as_str().map(str::to_string);
    let code = error["decline_code"]
        .as_str()
        .or_else(|| error["code"].as_str())
        .map(str::to_string);
    (message, code)
}

// ---------------------------------------------------------------------------
// Webhook signatures
// ---------------------------------------------------------------------------

/// Parsed `t=<unix>,v1=<hex>[,v1=<hex>...]` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> PaymentResult<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| PaymentError::WebhookVerificationError {
            message: "signature header has no timestamp".to_string(),
        })?;
        if signatures.is_empty() {
            return Err(PaymentError::WebhookVerificationError {
                message: "signature header has no v1 signature".to_string(),
            });
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Builds a header the processor would send for `payload`.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    format!("t={},v1={}", timestamp, sign_payload(secret, timestamp, payload))
}

/// Checks the HMAC-SHA256 signature and timestamp tolerance. Runs on raw
/// bytes; nothing is parsed until this succeeds.
pub fn verify_timestamped_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> PaymentResult<()> {
    let header = SignatureHeader::parse(header)?;

    if (now_unix - header.timestamp).abs() > tolerance_secs {
        warn!(
            event_timestamp = header.timestamp,
            current_time = now_unix,
            "webhook timestamp outside tolerance"
        );
        return Err(PaymentError::WebhookVerificationError {
            message: "timestamp outside tolerance".to_string(),
        });
    }

    let expected = sign_payload(secret, header.timestamp, payload);
    let matched = header
        .signatures
        .iter()
        .any(|candidate| secure_eq(expected.as_bytes(), candidate.trim().as_bytes()));
    if !matched {
        return Err(PaymentError::WebhookVerificationError {
            message: "signature mismatch".to_string(),
        });
    }
    Ok(())
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
