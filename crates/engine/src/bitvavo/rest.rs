use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use url::Url;

use common::{
    Candle, Error, ExecutionGateway, Fill, MarketData, MarketTicker, Order, OrderSide, OrderSize,
    Result,
};

const BASE_URL: &str = "https://api.bitvavo.com/v2";
/// Milliseconds the venue accepts a signed request after its timestamp.
const ACCESS_WINDOW_MS: u64 = 10_000;

type HmacSha256 = Hmac<Sha256>;

/// REST client for Bitvavo. Public endpoints work without credentials;
/// order placement needs an API key and secret.
pub struct BitvavoClient {
    credentials: Option<(String, String)>,
    base: Url,
    http: Client,
}

impl BitvavoClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let mut client = Self::public()?;
        client.credentials = Some((api_key.into(), secret.into()));
        Ok(client)
    }

    /// Client for market data only.
    pub fn public() -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            credentials: None,
            base: parse_base(BASE_URL)?,
            http,
        })
    }

    /// Point the client at another deployment of the same API.
    pub fn with_base_url(mut self, base: &str) -> Result<Self> {
        self.base = parse_base(base)?;
        Ok(self)
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("invalid request path '{path}': {e}")))
    }

    async fn public_get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = self.url(path)?;
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Unavailable(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, body: String) -> Result<(StatusCode, String)> {
        let (api_key, secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Config("Bitvavo API key and secret are required to trade".into()))?;
        let url = self.url(path)?;
        let ts = Self::timestamp_ms();
        let signature = sign(secret, ts, &Method::POST, url.path(), &body)?;

        let resp = self
            .http
            .post(url)
            .header("Bitvavo-Access-Key", api_key)
            .header("Bitvavo-Access-Signature", signature)
            .header("Bitvavo-Access-Timestamp", ts.to_string())
            .header("Bitvavo-Access-Window", ACCESS_WINDOW_MS.to_string())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok((status, text))
    }
}

fn parse_base(base: &str) -> Result<Url> {
    // `join` drops the last segment unless the base ends with a slash.
    let normalized = format!("{}/", base.trim_end_matches('/'));
    Url::parse(&normalized).map_err(|e| Error::Config(format!("invalid Bitvavo URL '{base}': {e}")))
}

/// `HMAC-SHA256(secret, timestamp + method + path + body)`, hex encoded.
/// `path` includes the `/v2` prefix and any query string.
pub fn sign(secret: &str, timestamp_ms: u64, method: &Method, path: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Config(format!("invalid Bitvavo secret: {e}")))?;
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(method.as_str().as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl MarketData for BitvavoClient {
    async fn markets(&self) -> Result<Vec<MarketTicker>> {
        let body = self.public_get("ticker/24h", &[]).await?;
        let rows: Vec<Ticker24h> = serde_json::from_str(&body)?;
        Ok(rows.into_iter().filter_map(Ticker24h::into_ticker).collect())
    }

    async fn candles(&self, market: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let path = format!("{market}/candles");
        let query = [("interval", interval.to_string()), ("limit", limit.to_string())];
        let body = self.public_get(&path, &query).await?;
        parse_candles(&body)
    }

    async fn price(&self, market: &str) -> Result<f64> {
        let body = self
            .public_get("ticker/price", &[("market", market.to_string())])
            .await?;
        let ticker: PriceTicker = serde_json::from_str(&body)?;
        parse_num(ticker.price.as_deref())
            .filter(|p| *p > 0.0)
            .ok_or_else(|| Error::Unavailable(format!("no price for {market}")))
    }
}

#[async_trait]
impl ExecutionGateway for BitvavoClient {
    async fn place_market_order(&self, order: &Order) -> Result<Fill> {
        let body = serde_json::to_string(&OrderRequest::from_order(order))?;
        debug!(market = %order.market, side = %order.side, client_order_id = %order.id, "Submitting order to Bitvavo");

        let (status, text) = self.signed_post("order", body).await?;
        if !status.is_success() {
            return Err(classify_error(status, &text));
        }
        let resp: OrderResponse =
            serde_json::from_str(&text).map_err(|e| Error::OrderUnconfirmed(e.to_string()))?;
        fill_from_response(order, resp)
    }
}

/// 4xx answers with an error code are refusals; everything else leaves the
/// order's fate unknown.
fn classify_error(status: StatusCode, body: &str) -> Error {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    match parsed {
        Some(err) if status.is_client_error() => Error::OrderRejected {
            reason: format!("{} (code {})", err.error, err.error_code),
        },
        _ => Error::Http(format!("HTTP {status}: {body}")),
    }
}

fn fill_from_response(order: &Order, resp: OrderResponse) -> Result<Fill> {
    let base = parse_num(resp.filled_amount.as_deref()).unwrap_or(0.0);
    let quote = parse_num(resp.filled_amount_quote.as_deref()).unwrap_or(0.0);
    if resp.status.as_deref() != Some("filled") || base <= 0.0 || quote <= 0.0 {
        return Err(Error::OrderUnconfirmed(format!(
            "order {} status {:?}, filled {base}",
            order.id, resp.status
        )));
    }

    let timestamp = resp
        .updated
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Ok(Fill {
        order_id: resp.client_order_id.unwrap_or_else(|| order.id.clone()),
        market: order.market.clone(),
        side: order.side,
        avg_price: quote / base,
        base_amount: base,
        quote_amount: quote,
        timestamp,
    })
}

/// The API returns candles newest first; callers get them oldest first.
fn parse_candles(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<(i64, String, String, String, String, String)> = serde_json::from_str(body)?;
    let mut candles = rows
        .into_iter()
        .map(|(ts, open, high, low, close, volume)| {
            let num = |s: &str| {
                s.parse::<f64>()
                    .map_err(|e| Error::Unavailable(format!("bad candle value '{s}': {e}")))
            };
            Ok(Candle {
                open: num(&open)?,
                high: num(&high)?,
                low: num(&low)?,
                close: num(&close)?,
                volume: num(&volume)?,
                timestamp: Utc
                    .timestamp_millis_opt(ts)
                    .single()
                    .ok_or_else(|| Error::Unavailable(format!("bad candle timestamp {ts}")))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
}

fn parse_num(s: Option<&str>) -> Option<f64> {
    s.and_then(|s| s.parse::<f64>().ok()).filter(|v| v.is_finite())
}

/// Amounts go out as decimal strings, rounded down so a full-balance sell
/// never exceeds what is held.
fn format_amount(value: f64, decimals: i32) -> String {
    let scale = 10f64.powi(decimals);
    let floored = (value * scale + 1e-9).floor() / scale;
    let s = format!("{floored:.prec$}", prec = decimals as usize);
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest {
    market: String,
    side: OrderSide,
    order_type: &'static str,
    client_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount_quote: Option<String>,
}

impl OrderRequest {
    fn from_order(order: &Order) -> Self {
        let (amount, amount_quote) = match order.size {
            OrderSize::Base(base) => (Some(format_amount(base, 8)), None),
            OrderSize::Quote(quote) => (None, Some(format_amount(quote, 2))),
        };
        Self {
            market: order.market.clone(),
            side: order.side,
            order_type: "market",
            client_order_id: order.id.clone(),
            amount,
            amount_quote,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    #[serde(default)]
    client_order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    filled_amount: Option<String>,
    #[serde(default)]
    filled_amount_quote: Option<String>,
    #[serde(default)]
    updated: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_code: i64,
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    market: String,
    #[serde(default)]
    open: Option<String>,
    #[serde(default)]
    last: Option<String>,
    #[serde(default)]
    volume_quote: Option<String>,
}

impl Ticker24h {
    fn into_ticker(self) -> Option<MarketTicker> {
        let last = parse_num(self.last.as_deref())?;
        let open = parse_num(self.open.as_deref()).unwrap_or(0.0);
        let price_change_pct = if open > 0.0 {
            (last - open) / open * 100.0
        } else {
            0.0
        };
        Some(MarketTicker {
            market: self.market,
            last_price: last,
            quote_volume: parse_num(self.volume_quote.as_deref()).unwrap_or(0.0),
            price_change_pct,
        })
    }
}

#[derive(Deserialize)]
struct PriceTicker {
    #[serde(default)]
    price: Option<String>,
}
