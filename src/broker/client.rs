// =============================================================================
// Kite REST client — header-token authenticated broker adapter
// =============================================================================
//
// SECURITY: the access token is never logged or serialised. Every request
// carries `Authorization: token <api_key>:<access_token>`; the session
// lifecycle (login, token refresh) is owned by an external supervisor, not
// this client.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, instrument, warn};

use crate::broker::types::{
    GttParams, InstrumentRecord, NetPosition, OrderEvent, OrderParams, OrderStatus, QuotePayload,
};
use crate::broker::BrokerApi;
use crate::types::{Bar, Side};

/// Kite Connect-style REST client. Credentials are baked into the default
/// headers at construction and never stored or logged.
#[derive(Clone)]
pub struct KiteClient {
    base_url: String,
    client: reqwest::Client,
}

impl KiteClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `api_key`      — application key, sent only in the auth header.
    /// * `access_token` — session token minted by the external auth flow.
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let access_token = access_token.into();

        let mut default_headers = HeaderMap::new();
        let auth = format!("token {api_key}:{access_token}");
        if let Ok(val) = HeaderValue::from_str(&auth) {
            default_headers.insert("Authorization", val);
        }
        default_headers.insert("X-Kite-Version", HeaderValue::from_static("3"));

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!("KiteClient initialised (base_url=https://api.kite.trade)");

        Self {
            base_url: "https://api.kite.trade".to_string(),
            client,
        }
    }

    /// GET a JSON endpoint and unwrap the `data` envelope.
    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response for {path}"))?;

        if !status.is_success() {
            anyhow::bail!("broker GET {} returned {}: {}", path, status, body);
        }

        Ok(body.get("data").cloned().unwrap_or(body))
    }

    /// Parse a JSON value that may be a string or number into f64.
    fn parse_f64(val: &serde_json::Value) -> f64 {
        if let Some(n) = val.as_f64() {
            n
        } else if let Some(s) = val.as_str() {
            s.parse().unwrap_or(0.0)
        } else {
            0.0
        }
    }
}

#[async_trait]
impl BrokerApi for KiteClient {
    #[instrument(skip(self), name = "kite::instruments")]
    async fn instruments(&self, exchange: &str) -> Result<Vec<InstrumentRecord>> {
        let data = self.get_json(&format!("/instruments/{exchange}")).await?;
        let rows = data.as_array().context("instrument dump is not an array")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let tradingsymbol = match row["tradingsymbol"].as_str() {
                Some(s) => s.to_string(),
                None => continue,
            };
            let token = row["instrument_token"].as_u64().unwrap_or(0) as u32;
            if token == 0 {
                warn!(symbol = %tradingsymbol, "instrument row missing token, skipped");
                continue;
            }
            records.push(InstrumentRecord {
                instrument_token: token,
                tradingsymbol,
                exchange: row["exchange"].as_str().unwrap_or(exchange).to_string(),
                lot_size: row["lot_size"].as_i64().unwrap_or(1),
                expiry: row["expiry"]
                    .as_str()
                    .and_then(|s| s.parse().ok()),
                strike: Self::parse_f64(&row["strike"]),
                instrument_type: row["instrument_type"].as_str().unwrap_or("").to_string(),
            });
        }

        debug!(exchange, count = records.len(), "instrument dump fetched");
        Ok(records)
    }

    #[instrument(skip(self, from, to), name = "kite::historical_data")]
    async fn historical_data(
        &self,
        token: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: &str,
    ) -> Result<Vec<Bar>> {
        let path = format!(
            "/instruments/historical/{}/{}?from={}&to={}",
            token,
            interval,
            from.format("%Y-%m-%d %H:%M:%S"),
            to.format("%Y-%m-%d %H:%M:%S"),
        );
        let data = self.get_json(&path).await?;

        let rows = data["candles"]
            .as_array()
            .context("historical response missing 'candles'")?;

        let mut bars = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = row.as_array().context("candle row is not an array")?;
            if arr.len() < 6 {
                warn!(len = arr.len(), "skipping malformed candle row");
                continue;
            }
            let ts = arr[0]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc))
                .context("candle timestamp unparseable")?;
            bars.push(Bar {
                ts,
                open: Self::parse_f64(&arr[1]),
                high: Self::parse_f64(&arr[2]),
                low: Self::parse_f64(&arr[3]),
                close: Self::parse_f64(&arr[4]),
                volume: Self::parse_f64(&arr[5]),
            });
        }

        debug!(token, interval, count = bars.len(), "historical bars fetched");
        Ok(bars)
    }

    #[instrument(skip(self, keys), name = "kite::quote")]
    async fn quote(&self, keys: &[String]) -> Result<HashMap<String, QuotePayload>> {
        let query: Vec<String> = keys.iter().map(|k| format!("i={k}")).collect();
        let data = self.get_json(&format!("/quote?{}", query.join("&"))).await?;

        let obj = data.as_object().context("quote response is not an object")?;
        let mut out = HashMap::with_capacity(obj.len());
        for (key, val) in obj {
            let payload = QuotePayload {
                last_price: Self::parse_f64(&val["last_price"]),
                bid: val["depth"]["buy"][0]["price"].as_f64(),
                ask: val["depth"]["sell"][0]["price"].as_f64(),
                volume: val["volume"].as_f64(),
                oi: val["oi"].as_f64(),
                iv: val["implied_volatility"].as_f64(),
            };
            // Strip the exchange prefix; callers key by trading symbol.
            let symbol = key.split_once(':').map(|(_, s)| s).unwrap_or(key);
            out.insert(symbol.to_string(), payload);
        }

        debug!(requested = keys.len(), received = out.len(), "quotes fetched");
        Ok(out)
    }

    #[instrument(skip(self, params), name = "kite::place_order")]
    async fn place_order(&self, params: &OrderParams) -> Result<String> {
        let url = format!("{}/orders/regular", self.base_url);
        let transaction_type = match params.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let quantity = params.quantity.to_string();
        let form = [
            ("exchange", params.exchange.as_str()),
            ("tradingsymbol", params.tradingsymbol.as_str()),
            ("transaction_type", transaction_type),
            ("order_type", "MARKET"),
            ("validity", "DAY"),
            ("product", params.product.as_str()),
            ("quantity", quantity.as_str()),
        ];

        debug!(
            symbol = %params.tradingsymbol,
            side = %params.side,
            quantity = params.quantity,
            "placing order"
        );

        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .context("POST /orders/regular request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse order response")?;

        if !status.is_success() {
            anyhow::bail!("broker POST /orders/regular returned {}: {}", status, body);
        }

        let order_id = body["data"]["order_id"]
            .as_str()
            .context("order response missing order_id")?
            .to_string();

        debug!(order_id = %order_id, "order placed");
        Ok(order_id)
    }

    #[instrument(skip(self), name = "kite::order_history")]
    async fn order_history(&self, order_id: &str) -> Result<Vec<OrderEvent>> {
        let data = self.get_json(&format!("/orders/{order_id}")).await?;
        let rows = data.as_array().context("order history is not an array")?;

        let events = rows
            .iter()
            .map(|row| OrderEvent {
                status: OrderStatus::parse(row["status"].as_str().unwrap_or("")),
                filled_quantity: row["filled_quantity"].as_i64().unwrap_or(0),
                average_price: Self::parse_f64(&row["average_price"]),
                status_message: row["status_message"].as_str().map(str::to_string),
            })
            .collect();
        Ok(events)
    }

    #[instrument(skip(self), name = "kite::cancel_order")]
    async fn cancel_order(&self, variety: &str, order_id: &str) -> Result<()> {
        let url = format!("{}/orders/{}/{}", self.base_url, variety, order_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE order request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            anyhow::bail!("broker cancel_order returned {}: {}", status, body);
        }
        debug!(order_id, "order cancelled");
        Ok(())
    }

    #[instrument(skip(self), name = "kite::available_cash")]
    async fn available_cash(&self) -> Result<f64> {
        let data = self.get_json("/user/margins").await?;
        let cash = data["equity"]["available"]["cash"]
            .as_f64()
            .context("margins response missing equity.available.cash")?;
        Ok(cash)
    }

    #[instrument(skip(self, params), name = "kite::order_margin")]
    async fn order_margin(&self, params: &OrderParams) -> Result<f64> {
        let url = format!("{}/margins/orders", self.base_url);
        let transaction_type = match params.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let payload = serde_json::json!([{
            "exchange": params.exchange,
            "tradingsymbol": params.tradingsymbol,
            "transaction_type": transaction_type,
            "variety": "regular",
            "product": params.product,
            "order_type": "MARKET",
            "quantity": params.quantity,
        }]);

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("POST /margins/orders request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse order-margin response")?;
        if !status.is_success() {
            anyhow::bail!("broker POST /margins/orders returned {}: {}", status, body);
        }

        let total = body["data"][0]["total"]
            .as_f64()
            .context("order-margin response missing total")?;
        Ok(total)
    }

    #[instrument(skip(self), name = "kite::net_positions")]
    async fn net_positions(&self) -> Result<Vec<NetPosition>> {
        let data = self.get_json("/portfolio/positions").await?;
        let rows = data["net"]
            .as_array()
            .context("positions response missing 'net'")?;

        let positions = rows
            .iter()
            .filter_map(|row| {
                let tradingsymbol = row["tradingsymbol"].as_str()?.to_string();
                Some(NetPosition {
                    tradingsymbol,
                    exchange: row["exchange"].as_str().unwrap_or("").to_string(),
                    quantity: row["quantity"].as_i64().unwrap_or(0),
                    average_price: Self::parse_f64(&row["average_price"]),
                    product: row["product"].as_str().unwrap_or("").to_string(),
                })
            })
            .collect();
        Ok(positions)
    }

    #[instrument(skip(self, params), name = "kite::place_gtt")]
    async fn place_gtt(&self, params: &GttParams) -> Result<u64> {
        let url = format!("{}/gtt/triggers", self.base_url);
        let transaction_type = match params.side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        };
        let payload = serde_json::json!({
            "type": "single",
            "condition": {
                "exchange": params.exchange,
                "tradingsymbol": params.tradingsymbol,
                "trigger_values": [params.trigger_price],
                "last_price": params.last_price,
            },
            "orders": [{
                "exchange": params.exchange,
                "tradingsymbol": params.tradingsymbol,
                "transaction_type": transaction_type,
                "quantity": params.quantity,
                "order_type": "LIMIT",
                "product": "MIS",
                "price": params.trigger_price,
            }],
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("POST /gtt/triggers request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse GTT response")?;
        if !status.is_success() {
            anyhow::bail!("broker POST /gtt/triggers returned {}: {}", status, body);
        }

        let id = body["data"]["trigger_id"]
            .as_u64()
            .context("GTT response missing trigger_id")?;
        debug!(trigger_id = id, symbol = %params.tradingsymbol, "protective GTT placed");
        Ok(id)
    }

    #[instrument(skip(self), name = "kite::delete_gtt")]
    async fn delete_gtt(&self, trigger_id: u64) -> Result<()> {
        let url = format!("{}/gtt/triggers/{}", self.base_url, trigger_id);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE /gtt/triggers request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("broker delete_gtt returned {}", resp.status());
        }
        debug!(trigger_id, "GTT deleted");
        Ok(())
    }
}

impl std::fmt::Debug for KiteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteClient")
            .field("credentials", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
