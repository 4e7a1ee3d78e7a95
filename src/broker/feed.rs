// =============================================================================
// Quote Feed — broker WebSocket stream for the primary underlying
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::market_data::MarketGateway;
use crate::types::Tick;

/// Connect to the broker quote WebSocket, subscribe to `underlying`, and feed
/// LTP ticks into the gateway.
///
/// Runs until the stream disconnects or errors, then returns so that the
/// caller (main.rs) can handle reconnection with its own backoff.
pub async fn run_quote_stream(
    url: &str,
    underlying: &str,
    gateway: &Arc<MarketGateway>,
) -> Result<()> {
    info!(url = %url, underlying = %underlying, "connecting to quote WebSocket");

    let (ws_stream, _response) = connect_async(url)
        .await
        .context("failed to connect to quote WebSocket")?;

    info!(underlying = %underlying, "quote WebSocket connected");
    let (mut write, mut read) = ws_stream.split();

    // Subscribe to LTP updates for the primary underlying.
    let subscribe = serde_json::json!({
        "action": "subscribe",
        "mode": "ltp",
        "tokens": [underlying],
    });
    write
        .send(Message::Text(subscribe.to_string()))
        .await
        .context("failed to send subscribe frame")?;

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match parse_ltp_frame(&text, underlying) {
                Ok(Some(tick)) => gateway.update_tick(tick),
                Ok(None) => {} // heartbeat or unrelated frame
                Err(e) => warn!(error = %e, "failed to parse quote frame"),
            },
            Some(Ok(Message::Ping(payload))) => {
                let _ = write.send(Message::Pong(payload)).await;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                error!(underlying = %underlying, error = %e, "quote WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(underlying = %underlying, "quote WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse an LTP frame.
///
/// Expected shape:
/// ```json
/// { "t": "ltp", "s": "NIFTY", "ltp": 19542.75, "ts": 1722480300123 }
/// ```
fn parse_ltp_frame(text: &str, underlying: &str) -> Result<Option<Tick>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse quote JSON")?;

    if root["t"].as_str() != Some("ltp") {
        return Ok(None);
    }
    let symbol = root["s"].as_str().unwrap_or_default();
    if symbol != underlying {
        return Ok(None);
    }

    let ltp = root["ltp"].as_f64().context("missing field ltp")?;
    let ts_ms = root["ts"]
        .as_i64()
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let timestamp = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(Tick {
        underlying: underlying.to_string(),
        ltp,
        timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ltp_frame() {
        let frame = r#"{ "t": "ltp", "s": "NIFTY", "ltp": 19542.75, "ts": 1722480300123 }"#;
        let tick = parse_ltp_frame(frame, "NIFTY").unwrap().unwrap();
        assert!((tick.ltp - 19542.75).abs() < 1e-9);
        assert_eq!(tick.underlying, "NIFTY");
    }

    #[test]
    fn ignores_other_symbols_and_heartbeats() {
        let other = r#"{ "t": "ltp", "s": "BANKNIFTY", "ltp": 45000.0 }"#;
        assert!(parse_ltp_frame(other, "NIFTY").unwrap().is_none());

        let heartbeat = r#"{ "t": "hb" }"#;
        assert!(parse_ltp_frame(heartbeat, "NIFTY").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(parse_ltp_frame("not json", "NIFTY").is_err());
        assert!(parse_ltp_frame(r#"{ "t": "ltp", "s": "NIFTY" }"#, "NIFTY").is_err());
    }
}
