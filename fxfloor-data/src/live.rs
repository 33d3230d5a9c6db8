use crate::{
    error::DataError,
    reconnect::{Event, ReconnectionSchedule},
    tick::Tick,
};
use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use fxfloor_instrument::InstrumentSymbol;
use fxfloor_integration::channel::{Tx, mpsc_unbounded};
use std::sync::Arc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

/// Convenient type alias for a live tick stream item.
pub type LiveTickEvent = Event<InstrumentSymbol, Tick>;

/// Live pricing feed for one instrument on one brokerage account.
///
/// `connect` opens a fresh broker pricing stream; the stream ends when the broker
/// closes the transport, at which point the consumer reconnects via the
/// [`ReconnectionSchedule`].
#[async_trait]
pub trait PricingFeed: Send + Sync {
    fn instrument(&self) -> InstrumentSymbol;

    async fn connect(&self) -> Result<BoxStream<'static, Result<Tick, DataError>>, DataError>;
}

/// Initialise a continually reconnecting live tick stream from the provided feed.
///
/// Yields [`Event::Item`] per tick and an [`Event::Reconnecting`] marker whenever the
/// inner stream disconnects. Consecutive failed reconnections back off through the
/// schedule; exhausting it ends the stream.
pub async fn init_live_tick_stream(
    feed: Arc<dyn PricingFeed>,
    mut schedule: ReconnectionSchedule,
) -> UnboundedReceiverStream<LiveTickEvent> {
    let (tx, rx) = mpsc_unbounded::<LiveTickEvent>();
    let instrument = feed.instrument();

    info!(%instrument, "live tick stream with auto reconnect running");

    tokio::spawn(async move {
        loop {
            match feed.connect().await {
                Ok(mut stream) => {
                    schedule.reset();
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(tick) => {
                                if tx.send(Event::Item(tick)).is_err() {
                                    return;
                                }
                            }
                            Err(error) => {
                                warn!(%instrument, %error, "live tick stream error, reconnecting");
                                break;
                            }
                        }
                    }
                    if tx.send(Event::Reconnecting(instrument.clone())).is_err() {
                        return;
                    }
                }
                Err(error) => {
                    warn!(
                        %instrument,
                        %error,
                        attempt = schedule.attempts(),
                        "failed to initialise live tick stream"
                    );
                }
            }

            if !schedule.should_retry() {
                warn!(
                    %instrument,
                    attempts = schedule.attempts(),
                    "live tick stream reconnect attempts exhausted"
                );
                return;
            }
            tokio::time::sleep(schedule.next_delay()).await;
            schedule.record_attempt();
        }
    });

    rx.into_stream()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    struct ScriptedFeed {
        instrument: InstrumentSymbol,
        batches: Mutex<Vec<Vec<Result<Tick, DataError>>>>,
    }

    impl ScriptedFeed {
        fn new(batches: Vec<Vec<Result<Tick, DataError>>>) -> Self {
            Self {
                instrument: InstrumentSymbol::new("EUR_USD"),
                batches: Mutex::new(batches),
            }
        }
    }

    #[async_trait]
    impl PricingFeed for ScriptedFeed {
        fn instrument(&self) -> InstrumentSymbol {
            self.instrument.clone()
        }

        async fn connect(&self) -> Result<BoxStream<'static, Result<Tick, DataError>>, DataError> {
            let mut batches = self.batches.lock();
            if batches.is_empty() {
                return Err(DataError::Feed("no more batches".into()));
            }
            let batch = batches.remove(0);
            Ok(futures::stream::iter(batch).boxed())
        }
    }

    fn tick() -> Tick {
        Tick::new(
            InstrumentSymbol::new("EUR_USD"),
            Utc::now(),
            dec!(1.0848),
            dec!(1.0852),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_stream_reconnects_between_batches() {
        let feed = Arc::new(ScriptedFeed::new(vec![vec![Ok(tick())], vec![Ok(tick())]]));
        let schedule = ReconnectionSchedule::new(vec![0], 1);

        let mut stream = init_live_tick_stream(feed, schedule).await;

        assert!(matches!(stream.next().await, Some(Event::Item(_))));
        assert!(matches!(stream.next().await, Some(Event::Reconnecting(_))));
        assert!(matches!(stream.next().await, Some(Event::Item(_))));
    }

    #[tokio::test]
    async fn test_stream_ends_when_schedule_exhausted() {
        let feed = Arc::new(ScriptedFeed::new(vec![vec![Ok(tick())]]));
        let schedule = ReconnectionSchedule::new(vec![0], 0);

        let mut stream = init_live_tick_stream(feed, schedule).await;

        assert!(matches!(stream.next().await, Some(Event::Item(_))));
        assert!(matches!(stream.next().await, Some(Event::Reconnecting(_))));
        assert_eq!(stream.next().await, None);
    }
}
