use crate::{
    account::{BrokerAccount, Environment},
    client::{
        BrokerClient, BrokerOrder, BrokerOrderRequest, BrokerPositionSide, BrokerTransaction,
        OrderOutcome,
    },
    error::ExecutionError,
    order::OrderKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use fxfloor_data::{Tick, error::DataError, live::PricingFeed};
use fxfloor_instrument::{Direction, InstrumentSymbol};
use fxfloor_integration::protocol::{EmptyBody, RestClient, RestRequest};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use smol_str::SmolStr;
use std::borrow::Cow;
use tracing::{debug, warn};

fn rest_base_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Practice => "https://api-fxpractice.oanda.com",
        Environment::Live => "https://api-fxtrade.oanda.com",
    }
}

fn stream_base_url(environment: Environment) -> &'static str {
    match environment {
        Environment::Practice => "https://stream-fxpractice.oanda.com",
        Environment::Live => "https://stream-fxtrade.oanda.com",
    }
}

/// OANDA v20 REST + streaming client for one brokerage account.
#[derive(Debug, Clone)]
pub struct OandaClient {
    broker_account_id: SmolStr,
    rest: RestClient,
    stream: RestClient,
}

impl OandaClient {
    pub fn new(account: &BrokerAccount) -> Self {
        Self {
            broker_account_id: account.broker_account_id.clone(),
            rest: RestClient::new(rest_base_url(account.environment), account.api_token.clone()),
            stream: RestClient::new(
                stream_base_url(account.environment),
                account.api_token.clone(),
            ),
        }
    }

    /// Pricing feed for one instrument on this account.
    pub fn pricing_feed(&self, instrument: InstrumentSymbol) -> OandaPricingFeed {
        OandaPricingFeed {
            broker_account_id: self.broker_account_id.clone(),
            stream: self.stream.clone(),
            instrument,
        }
    }
}

struct CreateOrderRequest {
    account_id: SmolStr,
    body: Value,
}

impl RestRequest for CreateOrderRequest {
    type Response = CreateOrderResponse;
    type Body = Value;

    fn method() -> reqwest::Method {
        reqwest::Method::POST
    }

    fn path(&self) -> Cow<'static, str> {
        Cow::Owned(format!("/v3/accounts/{}/orders", self.account_id))
    }

    fn body(&self) -> Option<&Self::Body> {
        Some(&self.body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderResponse {
    order_fill_transaction: Option<FillTransaction>,
    order_create_transaction: Option<TransactionRef>,
    order_reject_transaction: Option<RejectTransaction>,
    order_cancel_transaction: Option<CancelTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillTransaction {
    id: SmolStr,
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct TransactionRef {
    id: SmolStr,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectTransaction {
    reject_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CancelTransaction {
    reason: Option<String>,
}

struct CancelOrderRequest {
    account_id: SmolStr,
    order_id: String,
}

impl RestRequest for CancelOrderRequest {
    type Response = Value;
    type Body = EmptyBody;

    fn method() -> reqwest::Method {
        reqwest::Method::PUT
    }

    fn path(&self) -> Cow<'static, str> {
        Cow::Owned(format!(
            "/v3/accounts/{}/orders/{}/cancel",
            self.account_id, self.order_id
        ))
    }
}

struct PendingOrdersRequest {
    account_id: SmolStr,
}

impl RestRequest for PendingOrdersRequest {
    type Response = PendingOrdersResponse;
    type Body = EmptyBody;

    fn method() -> reqwest::Method {
        reqwest::Method::GET
    }

    fn path(&self) -> Cow<'static, str> {
        Cow::Owned(format!("/v3/accounts/{}/pendingOrders", self.account_id))
    }
}

#[derive(Debug, Deserialize)]
struct PendingOrdersResponse {
    #[serde(default)]
    orders: Vec<OandaOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OandaOrder {
    id: SmolStr,
    #[serde(default)]
    instrument: Option<SmolStr>,
    #[serde(rename = "type")]
    order_type: String,
    #[serde(default)]
    units: Option<Decimal>,
    #[serde(default)]
    price: Option<Decimal>,
}

struct OpenPositionsRequest {
    account_id: SmolStr,
}

impl RestRequest for OpenPositionsRequest {
    type Response = OpenPositionsResponse;
    type Body = EmptyBody;

    fn method() -> reqwest::Method {
        reqwest::Method::GET
    }

    fn path(&self) -> Cow<'static, str> {
        Cow::Owned(format!("/v3/accounts/{}/openPositions", self.account_id))
    }
}

#[derive(Debug, Deserialize)]
struct OpenPositionsResponse {
    #[serde(default)]
    positions: Vec<OandaPosition>,
}

#[derive(Debug, Deserialize)]
struct OandaPosition {
    instrument: SmolStr,
    long: OandaPositionSide,
    short: OandaPositionSide,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OandaPositionSide {
    #[serde(default)]
    units: Decimal,
    #[serde(default)]
    average_price: Option<Decimal>,
    #[serde(default, rename = "unrealizedPL")]
    unrealized_pl: Option<Decimal>,
}

fn order_kind_tag(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "MARKET",
        OrderKind::Limit | OrderKind::Oco => "LIMIT",
        OrderKind::Stop => "STOP",
    }
}

fn parse_order_kind(tag: &str) -> OrderKind {
    match tag {
        "LIMIT" => OrderKind::Limit,
        "STOP" => OrderKind::Stop,
        _ => OrderKind::Market,
    }
}

/// Raw transaction frame from the v20 transaction stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OandaTransactionFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<SmolStr>,
    #[serde(rename = "orderID", default)]
    order_id: Option<SmolStr>,
    #[serde(rename = "tradeID", default)]
    trade_id: Option<SmolStr>,
    #[serde(default)]
    instrument: Option<SmolStr>,
    #[serde(default)]
    units: Option<Decimal>,
    #[serde(default)]
    price: Option<Decimal>,
    #[serde(default)]
    pl: Option<Decimal>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    reject_reason: Option<String>,
    time: DateTime<Utc>,
}

impl OandaTransactionFrame {
    fn into_transaction(self) -> Option<BrokerTransaction> {
        let transaction_id = self.id.clone().unwrap_or_default();
        match self.kind.as_str() {
            "ORDER_FILL" => Some(BrokerTransaction::OrderFill {
                transaction_id,
                order_id: self.order_id?,
                instrument: InstrumentSymbol(self.instrument?),
                units: self.units.unwrap_or_default(),
                price: self.price.unwrap_or_default(),
                pl: self.pl.unwrap_or_default(),
                time: self.time,
            }),
            "ORDER_CANCEL" => Some(BrokerTransaction::OrderCancel {
                transaction_id,
                order_id: self.order_id?,
                reason: self.reason.unwrap_or_else(|| "unknown".into()),
                time: self.time,
            }),
            "MARKET_ORDER_REJECT" | "LIMIT_ORDER_REJECT" | "STOP_ORDER_REJECT" => {
                Some(BrokerTransaction::OrderReject {
                    transaction_id,
                    order_id: self.order_id.unwrap_or_default(),
                    reason: self.reject_reason.unwrap_or_else(|| "unknown".into()),
                    time: self.time,
                })
            }
            "TRADE_CLOSE" => Some(BrokerTransaction::TradeClose {
                transaction_id,
                trade_id: self.trade_id?,
                instrument: InstrumentSymbol(self.instrument?),
                units: self.units.unwrap_or_default(),
                price: self.price.unwrap_or_default(),
                pl: self.pl.unwrap_or_default(),
                time: self.time,
            }),
            "TRADE_REDUCE" => Some(BrokerTransaction::TradeReduce {
                transaction_id,
                trade_id: self.trade_id?,
                instrument: InstrumentSymbol(self.instrument?),
                units: self.units.unwrap_or_default(),
                price: self.price.unwrap_or_default(),
                pl: self.pl.unwrap_or_default(),
                time: self.time,
            }),
            "HEARTBEAT" => Some(BrokerTransaction::Heartbeat { time: self.time }),
            other => {
                debug!(kind = other, "unhandled transaction type");
                None
            }
        }
    }
}

#[async_trait]
impl BrokerClient for OandaClient {
    async fn create_order(
        &self,
        request: &BrokerOrderRequest,
    ) -> Result<OrderOutcome, ExecutionError> {
        let mut order = json!({
            "instrument": request.instrument.name(),
            "units": request.units.to_string(),
            "type": order_kind_tag(request.kind),
            "timeInForce": request.time_in_force.to_string(),
        });
        if let Some(price) = request.price {
            order["price"] = json!(price.to_string());
        }
        if let Some(take_profit) = request.take_profit {
            order["takeProfitOnFill"] = json!({"price": take_profit.to_string()});
        }
        if let Some(stop_loss) = request.stop_loss {
            order["stopLossOnFill"] = json!({"price": stop_loss.to_string()});
        }

        let response = self
            .rest
            .execute(CreateOrderRequest {
                account_id: self.broker_account_id.clone(),
                body: json!({"order": order}),
            })
            .await?;

        if let Some(fill) = response.order_fill_transaction {
            return Ok(OrderOutcome::Filled {
                broker_order_id: fill.id,
                price: fill.price,
            });
        }
        if let Some(reject) = response.order_reject_transaction {
            return Err(ExecutionError::BrokerReject {
                reason: reject
                    .reject_reason
                    .unwrap_or_else(|| "unknown rejection reason".into()),
            });
        }
        if let Some(created) = response.order_create_transaction {
            return Ok(OrderOutcome::Created {
                broker_order_id: created.id,
            });
        }
        if let Some(cancel) = response.order_cancel_transaction {
            return Err(ExecutionError::BrokerReject {
                reason: cancel.reason.unwrap_or_else(|| "order cancelled".into()),
            });
        }

        Err(ExecutionError::Decode(
            "order response carried no known transaction".into(),
        ))
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), ExecutionError> {
        self.rest
            .execute(CancelOrderRequest {
                account_id: self.broker_account_id.clone(),
                order_id: broker_order_id.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn list_pending_orders(&self) -> Result<Vec<BrokerOrder>, ExecutionError> {
        let response = self
            .rest
            .execute(PendingOrdersRequest {
                account_id: self.broker_account_id.clone(),
            })
            .await?;

        Ok(response
            .orders
            .into_iter()
            .filter_map(|order| {
                Some(BrokerOrder {
                    id: order.id,
                    instrument: InstrumentSymbol(order.instrument?),
                    kind: parse_order_kind(&order.order_type),
                    units: order.units?,
                    price: order.price,
                })
            })
            .collect())
    }

    async fn list_open_positions(&self) -> Result<Vec<BrokerPositionSide>, ExecutionError> {
        let response = self
            .rest
            .execute(OpenPositionsRequest {
                account_id: self.broker_account_id.clone(),
            })
            .await?;

        let mut sides = Vec::new();
        for position in response.positions {
            let instrument = InstrumentSymbol(position.instrument);
            if !position.long.units.is_zero() {
                sides.push(BrokerPositionSide {
                    instrument: instrument.clone(),
                    direction: Direction::Long,
                    units: position.long.units,
                    average_price: position.long.average_price.unwrap_or_default(),
                    unrealized_pnl: position.long.unrealized_pl.unwrap_or_default(),
                });
            }
            if !position.short.units.is_zero() {
                sides.push(BrokerPositionSide {
                    instrument,
                    direction: Direction::Short,
                    units: position.short.units.abs(),
                    average_price: position.short.average_price.unwrap_or_default(),
                    unrealized_pnl: position.short.unrealized_pl.unwrap_or_default(),
                });
            }
        }
        Ok(sides)
    }

    async fn transaction_stream(
        &self,
    ) -> Result<BoxStream<'static, Result<BrokerTransaction, ExecutionError>>, ExecutionError>
    {
        let lines = self
            .stream
            .stream_lines(&format!(
                "/v3/accounts/{}/transactions/stream",
                self.broker_account_id
            ))
            .await?;

        Ok(lines
            .filter_map(|line| async move {
                match line {
                    Ok(text) => match serde_json::from_str::<OandaTransactionFrame>(&text) {
                        Ok(frame) => frame.into_transaction().map(Ok),
                        Err(error) => {
                            warn!(%error, "undecodable transaction frame");
                            None
                        }
                    },
                    Err(error) => Some(Err(ExecutionError::Transport(error.to_string()))),
                }
            })
            .boxed())
    }
}

/// OANDA v20 pricing stream for one instrument.
#[derive(Debug, Clone)]
pub struct OandaPricingFeed {
    broker_account_id: SmolStr,
    stream: RestClient,
    instrument: InstrumentSymbol,
}

#[derive(Debug, Deserialize)]
struct OandaPriceFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    instrument: Option<SmolStr>,
    #[serde(default)]
    bids: Vec<OandaPriceBucket>,
    #[serde(default)]
    asks: Vec<OandaPriceBucket>,
    time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct OandaPriceBucket {
    price: Decimal,
}

#[async_trait]
impl PricingFeed for OandaPricingFeed {
    fn instrument(&self) -> InstrumentSymbol {
        self.instrument.clone()
    }

    async fn connect(&self) -> Result<BoxStream<'static, Result<Tick, DataError>>, DataError> {
        let path = format!(
            "/v3/accounts/{}/pricing/stream?instruments={}",
            self.broker_account_id,
            self.instrument.name()
        );
        let lines = self
            .stream
            .stream_lines(&path)
            .await
            .map_err(|error| DataError::Feed(error.to_string()))?;

        Ok(lines
            .filter_map(|line| async move {
                match line {
                    Ok(text) => {
                        let frame = serde_json::from_str::<OandaPriceFrame>(&text).ok()?;
                        if frame.kind != "PRICE" {
                            return None;
                        }
                        let instrument = InstrumentSymbol(frame.instrument?);
                        let bid = frame.bids.first()?.price;
                        let ask = frame.asks.first()?.price;
                        Some(Tick::new(instrument, frame.time, bid, ask))
                    }
                    Err(error) => Some(Err(DataError::Feed(error.to_string()))),
                }
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_frame_decodes() {
        let json = r#"{
            "type": "ORDER_FILL", "id": "42", "orderID": "41",
            "instrument": "EUR_USD", "units": "1000", "price": "1.0852",
            "pl": "0.0", "time": "2024-03-01T00:00:00.000000000Z"
        }"#;
        let frame: OandaTransactionFrame = serde_json::from_str(json).unwrap();
        let transaction = frame.into_transaction().unwrap();
        assert!(matches!(
            transaction,
            BrokerTransaction::OrderFill { ref order_id, .. } if order_id == "41"
        ));
    }

    #[test]
    fn test_reject_frame_maps_reject_reason() {
        let json = r#"{
            "type": "MARKET_ORDER_REJECT", "id": "7", "orderID": "6",
            "rejectReason": "INSUFFICIENT_MARGIN",
            "time": "2024-03-01T00:00:00Z"
        }"#;
        let frame: OandaTransactionFrame = serde_json::from_str(json).unwrap();
        let Some(BrokerTransaction::OrderReject { reason, .. }) = frame.into_transaction() else {
            panic!("expected OrderReject");
        };
        assert_eq!(reason, "INSUFFICIENT_MARGIN");
    }

    #[test]
    fn test_unknown_frame_is_skipped() {
        let json = r#"{"type": "CLIENT_CONFIGURE", "time": "2024-03-01T00:00:00Z"}"#;
        let frame: OandaTransactionFrame = serde_json::from_str(json).unwrap();
        assert!(frame.into_transaction().is_none());
    }

    #[test]
    fn test_price_frame_decodes_to_tick_inputs() {
        let json = r#"{
            "type": "PRICE", "instrument": "USD_JPY",
            "bids": [{"price": "149.491", "liquidity": 1000000}],
            "asks": [{"price": "149.509", "liquidity": 1000000}],
            "time": "2024-03-01T00:00:00Z"
        }"#;
        let frame: OandaPriceFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.kind, "PRICE");
        assert_eq!(frame.bids[0].price, Decimal::new(149491, 3));
    }
}
