use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use fxfloor_instrument::InstrumentSymbol;
use fxfloor_integration::channel::{Tx, UnboundedRx, UnboundedTx, mpsc_unbounded};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;

/// Demo-mode synthetic tick publisher.
pub mod demo;

/// WebSocket server wiring.
pub mod server;

/// Per-client session with tick batching.
pub mod session;

/// Close code for unauthenticated connections.
pub const CLOSE_UNAUTHENTICATED: u16 = 4001;

/// Close code for authenticated but unauthorised connections.
pub const CLOSE_UNAUTHORISED: u16 = 4003;

/// Close code for generic errors.
pub const CLOSE_ERROR: u16 = 4000;

/// Account id that enables the synthetic demo stream.
pub const DEMO_ACCOUNT: &str = "default";

/// One subscription routing key.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum Topic {
    /// Tick updates for `(account, instrument)`.
    MarketData {
        account: SmolStr,
        instrument: InstrumentSymbol,
    },
    /// Position P&L updates for an account.
    Positions { account: SmolStr },
    /// Staff-only admin dashboard feed.
    AdminDashboard,
    /// Staff-only admin notification feed.
    AdminNotifications,
}

/// Parse a WebSocket URL path into its [`Topic`].
///
/// Recognised routes:
/// * `/ws/market-data/{account_id}/{instrument}/`
/// * `/ws/positions/{account_id}/`
/// * `/ws/admin/dashboard/`
/// * `/ws/admin/notifications/`
pub fn parse_path(path: &str) -> Option<Topic> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["ws", "market-data", account, instrument] => Some(Topic::MarketData {
            account: SmolStr::new(account),
            instrument: InstrumentSymbol::new(*instrument),
        }),
        ["ws", "positions", account] => Some(Topic::Positions {
            account: SmolStr::new(account),
        }),
        ["ws", "admin", "dashboard"] => Some(Topic::AdminDashboard),
        ["ws", "admin", "notifications"] => Some(Topic::AdminNotifications),
        _ => None,
    }
}

/// Authenticated connection context.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct AuthContext {
    pub user_id: SmolStr,
    pub is_staff: bool,
    /// Brokerage account ids this user owns.
    pub accounts: Vec<SmolStr>,
}

impl AuthContext {
    fn owns(&self, account: &str) -> bool {
        account == DEMO_ACCOUNT || self.accounts.iter().any(|owned| owned == account)
    }
}

/// Authorise a topic subscription, returning the close code on refusal.
pub fn authorise(topic: &Topic, auth: Option<&AuthContext>) -> Result<(), u16> {
    let Some(auth) = auth else {
        return Err(CLOSE_UNAUTHENTICATED);
    };
    match topic {
        Topic::MarketData { account, .. } | Topic::Positions { account } => {
            if auth.owns(account) {
                Ok(())
            } else {
                Err(CLOSE_UNAUTHORISED)
            }
        }
        Topic::AdminDashboard | Topic::AdminNotifications => {
            if auth.is_staff {
                Ok(())
            } else {
                Err(CLOSE_UNAUTHORISED)
            }
        }
    }
}

/// One tick frame as delivered to clients.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct TickPayload {
    pub instrument: InstrumentSymbol,
    pub time: DateTime<Utc>,
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_liquidity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_liquidity: Option<u64>,
}

/// One event published through the hub to topic subscribers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Broadcast {
    Tick(TickPayload),
    Pnl(Value),
    ConnectionStatus(Value),
    DemoReminder(String),
    Admin(Value),
}

/// Pub/sub hub routing [`Broadcast`]s to per-client subscriptions.
///
/// Disconnected subscribers are pruned on the next publish to their topic.
#[derive(Debug, Default)]
pub struct Hub {
    subscriptions: Mutex<FnvHashMap<Topic, Vec<UnboundedTx<Broadcast>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a topic, receiving every subsequent broadcast.
    pub fn subscribe(&self, topic: Topic) -> UnboundedRx<Broadcast> {
        let (tx, rx) = mpsc_unbounded();
        self.subscriptions.lock().entry(topic).or_default().push(tx);
        rx
    }

    /// Publish a broadcast to every live subscriber of the topic.
    pub fn publish(&self, topic: &Topic, broadcast: Broadcast) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(subscribers) = subscriptions.get_mut(topic) {
            subscribers.retain(|tx| tx.send(broadcast.clone()).is_ok());
            if subscribers.is_empty() {
                subscriptions.remove(topic);
            }
        }
    }

    /// Number of live subscribers on a topic. Helper used in tests.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.subscriptions
            .lock()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Publish a tick for `(account, instrument)` market-data subscribers.
    pub fn publish_tick(&self, account: &SmolStr, tick: TickPayload) {
        self.publish(
            &Topic::MarketData {
                account: account.clone(),
                instrument: tick.instrument.clone(),
            },
            Broadcast::Tick(tick),
        );
    }

    /// Publish a position P&L update for an account's subscribers.
    pub fn publish_pnl(&self, account: &SmolStr, data: Value) {
        self.publish(
            &Topic::Positions {
                account: account.clone(),
            },
            Broadcast::Pnl(data),
        );
    }

    /// Publish a transaction stream status frame to the account's market-data and
    /// position subscribers.
    pub fn publish_stream_status(
        &self,
        account: &SmolStr,
        instrument: &InstrumentSymbol,
        status: Value,
    ) {
        self.publish(
            &Topic::MarketData {
                account: account.clone(),
                instrument: instrument.clone(),
            },
            Broadcast::ConnectionStatus(status.clone()),
        );
        self.publish(
            &Topic::Positions {
                account: account.clone(),
            },
            Broadcast::ConnectionStatus(status),
        );
    }

    /// Publish an admin notification to the staff feed.
    pub fn publish_admin(&self, data: Value) {
        self.publish(&Topic::AdminNotifications, Broadcast::Admin(data));
    }
}
