use crate::{error::DataError, tick::Tick};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxfloor_instrument::InstrumentSymbol;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Loader abstraction over a historical tick data source.
///
/// Backtests pull a bounded range of ticks for one instrument; implementations wrap
/// a database, object store, or in-memory fixture.
#[async_trait]
pub trait TickDataSource: Send + Sync {
    async fn load(
        &self,
        instrument: &InstrumentSymbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Tick>, DataError>;
}

/// Finite, ordered sequence of historical ticks for one instrument.
///
/// Construction sorts by timestamp and rejects empty ranges, so consumers can rely
/// on monotonically non-decreasing tick times.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct HistoricalTicks {
    instrument: InstrumentSymbol,
    ticks: Vec<Tick>,
}

impl HistoricalTicks {
    pub fn new(instrument: InstrumentSymbol, mut ticks: Vec<Tick>) -> Result<Self, DataError> {
        if ticks.is_empty() {
            return Err(DataError::HistoryEmpty);
        }
        ticks.sort_by_key(|tick| tick.time);
        Ok(Self { instrument, ticks })
    }

    /// Load and validate a bounded historical range from the provided source.
    pub async fn load(
        source: &dyn TickDataSource,
        instrument: InstrumentSymbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self, DataError> {
        if start >= end {
            return Err(DataError::RangeInverted { start, end });
        }

        let ticks = source.load(&instrument, start, end).await?;
        let sequence = Self::new(instrument.clone(), ticks)?;

        info!(
            %instrument,
            %start,
            %end,
            ticks = sequence.len(),
            "loaded historical tick data"
        );

        Ok(sequence)
    }

    pub fn instrument(&self) -> &InstrumentSymbol {
        &self.instrument
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Downsample to at most `limit` ticks by keeping every Nth sample.
    ///
    /// Applied when a backtest range exceeds the configured memory ceiling; the
    /// first and last ticks of the range are always retained.
    pub fn downsample(self, limit: usize) -> Self {
        if limit == 0 || self.ticks.len() <= limit {
            return self;
        }

        let step = self.ticks.len().div_ceil(limit);
        let last_index = self.ticks.len() - 1;
        let ticks = self
            .ticks
            .into_iter()
            .enumerate()
            .filter(|(index, _)| index % step == 0 || *index == last_index)
            .map(|(_, tick)| tick)
            .collect();

        Self {
            instrument: self.instrument,
            ticks,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tick> {
        self.ticks.iter()
    }
}

impl IntoIterator for HistoricalTicks {
    type Item = Tick;
    type IntoIter = std::vec::IntoIter<Tick>;

    fn into_iter(self) -> Self::IntoIter {
        self.ticks.into_iter()
    }
}

/// In-memory [`TickDataSource`] used for testing and scripted backtests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTickData {
    ticks: Vec<Tick>,
}

impl InMemoryTickData {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self { ticks }
    }
}

#[async_trait]
impl TickDataSource for InMemoryTickData {
    async fn load(
        &self,
        instrument: &InstrumentSymbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Tick>, DataError> {
        Ok(self
            .ticks
            .iter()
            .filter(|tick| {
                tick.instrument == *instrument && tick.time >= start && tick.time <= end
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    fn ticks(count: usize) -> Vec<Tick> {
        let base = DateTime::<Utc>::MIN_UTC;
        (0..count)
            .map(|index| {
                Tick::new(
                    InstrumentSymbol::new("EUR_USD"),
                    base + TimeDelta::seconds(index as i64),
                    dec!(1.0848),
                    dec!(1.0852),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_construction_sorts_by_time() {
        let mut unsorted = ticks(5);
        unsorted.reverse();
        let sequence = HistoricalTicks::new(InstrumentSymbol::new("EUR_USD"), unsorted).unwrap();

        let times: Vec<_> = sequence.iter().map(|tick| tick.time).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn test_empty_history_rejected() {
        let error = HistoricalTicks::new(InstrumentSymbol::new("EUR_USD"), vec![]).unwrap_err();
        assert_eq!(error, DataError::HistoryEmpty);
    }

    #[test]
    fn test_downsample_respects_limit_and_keeps_last() {
        let sequence = HistoricalTicks::new(InstrumentSymbol::new("EUR_USD"), ticks(100)).unwrap();
        let last_time = sequence.ticks.last().unwrap().time;

        let sampled = sequence.downsample(10);
        assert!(sampled.len() <= 11);
        assert_eq!(sampled.ticks.last().unwrap().time, last_time);
    }

    #[tokio::test]
    async fn test_load_rejects_inverted_range() {
        let source = InMemoryTickData::new(ticks(3));
        let start = DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(10);
        let end = DateTime::<Utc>::MIN_UTC;

        let error = HistoricalTicks::load(&source, InstrumentSymbol::new("EUR_USD"), start, end)
            .await
            .unwrap_err();
        assert!(matches!(error, DataError::RangeInverted { .. }));
    }
}
