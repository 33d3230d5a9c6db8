use crate::realtime::{Broadcast, DEMO_ACCOUNT, Hub, TickPayload, Topic};
use fxfloor_data::demo::DemoTickGenerator;
use fxfloor_instrument::InstrumentSymbol;
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::info;

/// Reminder pushed alongside the synthetic stream.
pub const DEMO_REMINDER_MESSAGE: &str =
    "Demo mode active. Register a brokerage account for real data.";

/// Spawn a synthetic tick publisher for the `default` demo account.
///
/// Emits one random-walk tick per `interval` on the demo market-data topic, plus a
/// demo-mode reminder every 60 ticks. The task ends when the last subscriber goes
/// away and a subsequent publish finds the topic empty.
pub fn spawn_demo_stream(
    hub: Arc<Hub>,
    instrument: InstrumentSymbol,
    interval: Duration,
) -> JoinHandle<()> {
    let topic = Topic::MarketData {
        account: SmolStr::new(DEMO_ACCOUNT),
        instrument: instrument.clone(),
    };
    let mut generator = DemoTickGenerator::new(instrument.clone());

    info!(%instrument, "demo market data stream started");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;

            let demo = generator.next_tick();
            hub.publish(
                &topic,
                Broadcast::Tick(TickPayload {
                    instrument: demo.tick.instrument.clone(),
                    time: demo.tick.time,
                    bid: demo.tick.bid,
                    ask: demo.tick.ask,
                    mid: demo.tick.mid,
                    spread: Some(demo.spread),
                    bid_liquidity: Some(demo.bid_liquidity),
                    ask_liquidity: Some(demo.ask_liquidity),
                }),
            );

            if generator.should_remind() {
                hub.publish(
                    &topic,
                    Broadcast::DemoReminder(DEMO_REMINDER_MESSAGE.to_string()),
                );
            }

            if generator.ticks_emitted() > 1 && hub.subscriber_count(&topic) == 0 {
                info!(%instrument, "demo market data stream stopping, no subscribers");
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn test_demo_stream_publishes_ticks_and_reminders() {
        let hub = Arc::new(Hub::new());
        let topic = Topic::MarketData {
            account: SmolStr::new(DEMO_ACCOUNT),
            instrument: InstrumentSymbol::new("USD_JPY"),
        };
        let rx = hub.subscribe(topic);

        let handle = spawn_demo_stream(
            Arc::clone(&hub),
            InstrumentSymbol::new("USD_JPY"),
            Duration::from_millis(10),
        );

        let mut stream = rx.into_stream();
        let mut ticks = 0;
        let mut reminders = 0;
        for _ in 0..61 {
            match stream.next().await {
                Some(Broadcast::Tick(tick)) => {
                    assert!(tick.bid <= tick.mid && tick.mid <= tick.ask);
                    ticks += 1;
                }
                Some(Broadcast::DemoReminder(message)) => {
                    assert!(message.contains("Demo mode"));
                    reminders += 1;
                }
                _ => {}
            }
        }

        assert!(ticks >= 60);
        assert_eq!(reminders, 1);
        handle.abort();
    }
}
