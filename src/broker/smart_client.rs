// =============================================================================
// SmartAPI-style REST client — authenticated broker HTTP backend
// =============================================================================
//
// SECURITY: credentials are held in memory only; the TOTP secret and the
// session token never reach logs or serialized state. Every request carries a
// 5-second timeout so a hung broker call can never stall the tick loop.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::broker::api::{BrokerApi, OrderRequest, OrderResponse};
use crate::types::{GreeksSnapshot, Tick};

type HmacSha256 = Hmac<Sha256>;

/// Per-request timeout (seconds) for all broker calls.
const REQUEST_TIMEOUT_SECS: u64 = 5;

/// TOTP step in seconds (RFC 6238).
const TOTP_STEP_SECS: u64 = 30;

/// Session token re-login cadence (seconds).
const TOKEN_REFRESH_SECS: u64 = 20 * 60;

/// Authenticated REST client for the brokerage HTTP API.
pub struct SmartClient {
    api_key: String,
    client_code: String,
    password: String,
    totp_secret: String,
    base_url: String,
    client: reqwest::Client,
    session_token: Arc<RwLock<Option<String>>>,
    refresh_running: Arc<AtomicBool>,
}

impl SmartClient {
    pub fn new(
        api_key: impl Into<String>,
        client_code: impl Into<String>,
        password: impl Into<String>,
        totp_secret: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            api_key: api_key.into(),
            client_code: client_code.into(),
            password: password.into(),
            totp_secret: totp_secret.into(),
            base_url: "https://apiconnect.angelbroking.com".to_string(),
            client,
            session_token: Arc::new(RwLock::new(None)),
            refresh_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One login round against the auth endpoint; updates the shared token.
    async fn login_once(
        client: &reqwest::Client,
        base_url: &str,
        api_key: &str,
        client_code: &str,
        password: &str,
        totp_secret: &str,
        token_slot: &Arc<RwLock<Option<String>>>,
    ) -> Result<bool> {
        let totp = totp_now(totp_secret, Utc::now().timestamp() as u64);
        let payload = serde_json::json!({
            "clientcode": client_code,
            "password": password,
            "totp": totp,
        });

        let url = format!("{base_url}/rest/auth/angelbroking/user/v1/loginByPassword");
        let resp = client
            .post(&url)
            .header("X-PrivateKey", api_key)
            .json(&payload)
            .send()
            .await
            .context("login request failed")?;

        let body: serde_json::Value = resp.json().await.context("failed to parse login response")?;
        let token = body["data"]["jwtToken"].as_str().unwrap_or_default();

        if token.is_empty() {
            warn!(
                message = %body["message"].as_str().unwrap_or("unknown"),
                "broker login rejected"
            );
            return Ok(false);
        }

        *token_slot.write() = Some(token.to_string());
        info!(client = %client_code, "broker session established");
        Ok(true)
    }

    /// Override the API base URL (test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn auth_header(&self) -> Result<String> {
        self.session_token
            .read()
            .clone()
            .map(|t| format!("Bearer {t}"))
            .context("not authenticated")
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header()?)
            .header("X-PrivateKey", &self.api_key)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;
        if !status.is_success() {
            anyhow::bail!("broker GET {path} returned {status}: {body}");
        }
        Ok(body)
    }

    async fn post_json(&self, path: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header()?)
            .header("X-PrivateKey", &self.api_key)
            .json(payload)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;
        if !status.is_success() {
            anyhow::bail!("broker POST {path} returned {status}: {body}");
        }
        Ok(body)
    }
}

#[async_trait]
impl BrokerApi for SmartClient {
    async fn login(&self) -> Result<bool> {
        Self::login_once(
            &self.client,
            &self.base_url,
            &self.api_key,
            &self.client_code,
            &self.password,
            &self.totp_secret,
            &self.session_token,
        )
        .await
    }

    fn is_authenticated(&self) -> bool {
        self.session_token.read().is_some()
    }

    /// Re-login on a fixed cadence so the session token never lapses
    /// mid-session.
    fn start_auto_refresh(&self) {
        if self.refresh_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let client_code = self.client_code.clone();
        let password = self.password.clone();
        let totp_secret = self.totp_secret.clone();
        let token_slot = self.session_token.clone();
        let running = self.refresh_running.clone();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(TOKEN_REFRESH_SECS));
            interval.tick().await; // the first tick fires immediately
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                match Self::login_once(
                    &client,
                    &base_url,
                    &api_key,
                    &client_code,
                    &password,
                    &totp_secret,
                    &token_slot,
                )
                .await
                {
                    Ok(true) => debug!("session token refreshed"),
                    Ok(false) => warn!("session token refresh rejected"),
                    Err(e) => warn!(error = %e, "session token refresh failed"),
                }
            }
            debug!("token refresh worker stopped");
        });
    }

    fn stop_auto_refresh(&self) {
        self.refresh_running.store(false, Ordering::SeqCst);
    }

    async fn get_ltp_with_timestamp(&self, underlying: &str) -> Result<Tick> {
        let body = self
            .get_json(&format!(
                "/rest/secure/angelbroking/market/v1/ltp?symbol={underlying}"
            ))
            .await?;

        let ltp = body["data"]["ltp"]
            .as_f64()
            .context("ltp missing from quote response")?;
        let ts_ms = body["data"]["exchange_time"]
            .as_i64()
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        let timestamp = Utc
            .timestamp_millis_opt(ts_ms)
            .single()
            .unwrap_or_else(Utc::now);

        Ok(Tick {
            underlying: underlying.to_string(),
            ltp,
            timestamp,
        })
    }

    async fn get_option_quote(&self, symbol: &str, exchange: &str) -> Result<GreeksSnapshot> {
        let body = self
            .get_json(&format!(
                "/rest/secure/angelbroking/market/v1/optionGreeks?symbol={symbol}&exchange={exchange}"
            ))
            .await?;

        let d = &body["data"];
        let f = |key: &str| d[key].as_f64().unwrap_or(0.0);
        let u = |key: &str| d[key].as_u64().unwrap_or(0);

        let snapshot = GreeksSnapshot {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            ltp: f("ltp"),
            bid: f("bid"),
            ask: f("ask"),
            volume: u("volume"),
            oi: u("oi"),
            delta: f("delta"),
            gamma: f("gamma"),
            theta: f("theta"),
            vega: f("vega"),
            iv: f("iv"),
            timestamp: Utc::now(),
        };

        if snapshot.ltp <= 0.0 {
            anyhow::bail!("broker returned empty quote for {symbol}");
        }
        if !snapshot.quote_consistent() {
            warn!(symbol, bid = snapshot.bid, ltp = snapshot.ltp, ask = snapshot.ask,
                "quote violates bid <= ltp <= ask");
        }

        debug!(symbol, ltp = snapshot.ltp, iv = snapshot.iv, "option quote fetched");
        Ok(snapshot)
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let payload = serde_json::json!({
            "exchange": request.exchange,
            "tradingsymbol": request.symbol,
            "transactiontype": request.action.to_string(),
            "ordertype": request.kind.to_string(),
            "price": request.price,
            "quantity": request.quantity,
            "producttype": request.product.to_string(),
            "duration": "DAY",
        });

        let body = self
            .post_json("/rest/secure/angelbroking/order/v1/placeOrder", &payload)
            .await?;

        Ok(OrderResponse {
            status: body["status"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| "error".to_string()),
            order_id: body["data"]["orderid"].as_str().map(str::to_string),
            message: body["message"].as_str().map(str::to_string),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderResponse> {
        let payload = serde_json::json!({ "orderid": order_id, "variety": "NORMAL" });
        let body = self
            .post_json("/rest/secure/angelbroking/order/v1/cancelOrder", &payload)
            .await?;

        Ok(OrderResponse {
            status: body["status"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| "error".to_string()),
            order_id: Some(order_id.to_string()),
            message: body["message"].as_str().map(str::to_string),
        })
    }

    async fn get_order_status(&self, order_id: &str) -> Result<serde_json::Value> {
        self.get_json(&format!(
            "/rest/secure/angelbroking/order/v1/details?orderid={order_id}"
        ))
        .await
    }
}

impl std::fmt::Debug for SmartClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartClient")
            .field("client_code", &self.client_code)
            .field("base_url", &self.base_url)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

// =============================================================================
// TOTP (RFC 6238, HMAC-SHA256 variant)
// =============================================================================

/// Decode an RFC 4648 base32 secret (padding optional, case-insensitive).
fn base32_decode(input: &str) -> Vec<u8> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut bits: u32 = 0;
    let mut bit_count: u32 = 0;
    let mut out = Vec::new();

    for ch in input.bytes() {
        if ch == b'=' || ch == b' ' {
            continue;
        }
        let upper = ch.to_ascii_uppercase();
        let Some(val) = ALPHABET.iter().position(|&c| c == upper) else {
            continue;
        };
        bits = (bits << 5) | val as u32;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }
    out
}

/// Generate the 6-digit TOTP code for `unix_secs`.
fn totp_now(secret: &str, unix_secs: u64) -> String {
    let key = base32_decode(secret);
    let counter = unix_secs / TOTP_STEP_SECS;

    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key size");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let code = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | digest[offset + 3] as u32;

    format!("{:06}", code % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_decodes_known_vector() {
        // "MZXW6YTB" is base32 for "fooba".
        assert_eq!(base32_decode("MZXW6YTB"), b"fooba");
        assert_eq!(base32_decode("mzxw6ytb"), b"fooba");
        assert_eq!(base32_decode("MZXW6YTB===="), b"fooba");
    }

    #[test]
    fn totp_is_stable_within_a_step_and_changes_across_steps() {
        // Step-aligned base so +29 s stays inside the same TOTP window.
        let t0 = 1_699_999_980;
        let a = totp_now("MZXW6YTBMZXW6YTB", t0);
        let b = totp_now("MZXW6YTBMZXW6YTB", t0 + 29);
        let c = totp_now("MZXW6YTBMZXW6YTB", t0 + TOTP_STEP_SECS);
        assert_eq!(a.len(), 6);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn client_starts_unauthenticated() {
        let client = SmartClient::new("key", "C123", "pass", "MZXW6YTB");
        assert!(!client.is_authenticated());
        assert!(client.auth_header().is_err());
    }
}
