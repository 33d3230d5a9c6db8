use crate::{
    config::SystemConfig,
    realtime::{
        AuthContext, CLOSE_ERROR, DEMO_ACCOUNT, Hub, Topic, authorise, demo, parse_path,
        session::{BatchingConfig, ClientSession},
    },
};
use fnv::FnvHashMap;
use futures::{SinkExt, StreamExt};
use fxfloor_instrument::InstrumentSymbol;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{Request, Response},
        protocol::{
            Message,
            frame::{CloseFrame, coding::CloseCode},
        },
    },
};
use tracing::{debug, info, warn};

/// Resolves the handshake request (token header / query string) to an
/// authenticated context, or `None` when unauthenticated.
pub type AuthResolver = Arc<dyn Fn(&Request) -> Option<AuthContext> + Send + Sync>;

/// Cadence of the synthetic demo tick stream.
const DEMO_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// WebSocket fan-out server.
///
/// Routes `/ws/market-data/{account}/{instrument}/`, `/ws/positions/{account}/`
/// and the staff-only admin feeds onto hub subscriptions, with per-client tick
/// batching. The `default` account spins up a synthetic demo stream on first
/// subscription.
pub struct RealtimeServer {
    hub: Arc<Hub>,
    config: SystemConfig,
    auth: AuthResolver,
    demo_streams: Mutex<FnvHashMap<InstrumentSymbol, tokio::task::JoinHandle<()>>>,
}

impl std::fmt::Debug for RealtimeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeServer").finish()
    }
}

impl RealtimeServer {
    pub fn new(hub: Arc<Hub>, config: SystemConfig, auth: AuthResolver) -> Self {
        Self {
            hub,
            config,
            auth,
            demo_streams: Mutex::new(FnvHashMap::default()),
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "realtime fan-out listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "websocket connection accepted");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(error) = server.handle_connection(stream).await {
                    debug!(%error, "websocket connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let mut path = String::new();
        let mut auth: Option<AuthContext> = None;
        let websocket = accept_hdr_async(stream, |request: &Request, response: Response| {
            path = request.uri().path().to_string();
            auth = (self.auth)(request);
            Ok(response)
        })
        .await?;
        let (mut sink, mut incoming) = websocket.split();

        let close = |code: u16| {
            Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            }))
        };

        let Some(topic) = parse_path(&path) else {
            warn!(path, "unroutable websocket path");
            sink.send(close(CLOSE_ERROR)).await?;
            return Ok(());
        };
        if let Err(code) = authorise(&topic, auth.as_ref()) {
            sink.send(close(code)).await?;
            return Ok(());
        }

        self.ensure_demo_stream(&topic);

        let rx = self.hub.subscribe(topic.clone());
        let mut broadcasts = rx.into_stream();
        let mut session = ClientSession::new(BatchingConfig::from_system(&self.config));
        let mut interval = tokio::time::interval(session.config().batch_interval());

        loop {
            tokio::select! {
                broadcast = broadcasts.next() => {
                    let Some(broadcast) = broadcast else { break };
                    if let Some(frame) = session.on_broadcast(broadcast) {
                        let json = serde_json::to_string(&frame)
                            .unwrap_or_else(|_| "{}".to_string());
                        sink.send(Message::text(json)).await?;
                    }
                }
                _ = interval.tick() => {
                    if let Some(frame) = session.flush() {
                        let json = serde_json::to_string(&frame)
                            .unwrap_or_else(|_| "{}".to_string());
                        sink.send(Message::text(json)).await?;
                    }
                }
                message = incoming.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(frame) = session.on_client_text(text.as_str()) {
                                let json = serde_json::to_string(&frame)
                                    .unwrap_or_else(|_| "{}".to_string());
                                sink.send(Message::text(json)).await?;
                                // Reconfiguration may have changed the interval.
                                interval = tokio::time::interval(session.config().batch_interval());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(error)) => {
                            debug!(%error, "websocket receive error");
                            break;
                        }
                    }
                }
            }
        }

        // Flush any buffered messages before the connection goes away.
        if let Some(frame) = session.flush()
            && let Ok(json) = serde_json::to_string(&frame)
        {
            let _ = sink.send(Message::text(json)).await;
        }
        Ok(())
    }

    /// Start the synthetic stream the first time a demo topic is subscribed.
    fn ensure_demo_stream(&self, topic: &Topic) {
        let Topic::MarketData {
            account,
            instrument,
        } = topic
        else {
            return;
        };
        if account != DEMO_ACCOUNT {
            return;
        }

        let mut streams = self.demo_streams.lock();
        let stale = streams
            .get(instrument)
            .map(|handle| handle.is_finished())
            .unwrap_or(true);
        if stale {
            streams.insert(
                instrument.clone(),
                demo::spawn_demo_stream(
                    Arc::clone(&self.hub),
                    instrument.clone(),
                    DEMO_TICK_INTERVAL,
                ),
            );
        }
    }
}
