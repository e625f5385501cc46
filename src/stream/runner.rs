//! Session runner
//!
//! A producer task reads JSONL transfer records, normalizes and de-duplicates
//! them, and feeds the bounded intake queue. The consumer drains the queue
//! into the engine one transfer at a time and writes every emitted event to
//! an [`EventSink`]. Between transfers an idle tick advances the engine on
//! the chain-aligned clock.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::backpressure::{Admission, IntakeQueue};
use super::clock::ChainClock;
use super::transfer::{RawTransfer, TransferEvent};
use crate::config::Config;
use crate::engine::{IntelligenceEngine, IntelligenceEvent};
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleState;

/// Destination for emitted intelligence events
pub trait EventSink {
    fn emit(&mut self, event: &IntelligenceEvent) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonlSink<W> {
    fn emit(&mut self, event: &IntelligenceEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| Error::Sink(e.to_string()))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| Error::Sink(e.to_string()))
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<IntelligenceEvent>,
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &IntelligenceEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }
}

/// Bounded set of recently seen correlation references
pub struct RecentReferences {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentReferences {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Remember `reference`; false if it was already seen.
    ///
    /// A capacity of 0 disables de-duplication.
    pub fn insert(&mut self, reference: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(reference) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(reference.to_string());
        self.seen.insert(reference.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Producer-side counters
#[derive(Debug, Clone, Copy, Default)]
struct IntakeStats {
    rejected: u64,
    duplicates: u64,
}

/// What a session did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub session_id: Uuid,
    pub processed: u64,
    pub rejected: u64,
    pub duplicates: u64,
    pub dropped: u64,
    pub threshold_events: u64,
    pub signal_events: u64,
    pub transition_events: u64,
    pub episodes: u64,
    pub final_state: LifecycleState,
}

impl RunSummary {
    fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            processed: 0,
            rejected: 0,
            duplicates: 0,
            dropped: 0,
            threshold_events: 0,
            signal_events: 0,
            transition_events: 0,
            episodes: 0,
            final_state: LifecycleState::Quiet,
        }
    }

    fn count(&mut self, event: &IntelligenceEvent) {
        match event {
            IntelligenceEvent::Threshold(_) => self.threshold_events += 1,
            IntelligenceEvent::Signal(_) => self.signal_events += 1,
            IntelligenceEvent::Transition(_) => self.transition_events += 1,
        }
    }
}

async fn ingest<R>(
    reader: R,
    queue: Arc<IntakeQueue<TransferEvent>>,
    dedup_capacity: usize,
    cancel: CancellationToken,
) -> IntakeStats
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut recent = RecentReferences::new(dedup_capacity);
    let mut stats = IntakeStats::default();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Input exhausted");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Input read failed, stopping intake");
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let transfer = match RawTransfer::from_json_line(trimmed).and_then(RawTransfer::normalize) {
            Ok(transfer) => transfer,
            Err(e) => {
                warn!(error = %e, "Skipping transfer");
                stats.rejected += 1;
                continue;
            }
        };

        if !recent.insert(&transfer.reference) {
            debug!(reference = %transfer.reference, "Duplicate transfer ignored");
            stats.duplicates += 1;
            continue;
        }

        match queue.send(transfer).await {
            Ok(Admission::Queued) => {}
            Ok(Admission::DroppedOldest) => warn!("Intake full, dropped oldest queued transfer"),
            Ok(Admission::DroppedIncoming) => warn!("Intake full, dropped incoming transfer"),
            Err(_) => break,
        }
    }

    queue.close();
    stats
}

/// Stream transfers from `reader` through `engine` until input ends or `cancel` fires.
///
/// Cancellation stops intake; a transfer already dequeued is always fully
/// processed first.
pub async fn run_session<R, S>(
    config: &Config,
    engine: &mut IntelligenceEngine,
    mut clock: ChainClock,
    reader: R,
    sink: &mut S,
    cancel: CancellationToken,
) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    S: EventSink,
{
    let session_id = Uuid::new_v4();
    let span = info_span!("session", %session_id, asset = %config.asset.id);

    async move {
        info!(replay = clock.is_replay(), "Session started");

        let queue = Arc::new(IntakeQueue::new(
            config.backpressure.channel_capacity,
            config.backpressure.drop_policy,
        ));
        let producer = tokio::spawn(ingest(
            reader,
            queue.clone(),
            config.capacity.dedup_references,
            cancel.clone(),
        ));

        let mut tick = tokio::time::interval(Duration::from_millis(config.runtime.tick_interval_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut summary = RunSummary::new(session_id);

        loop {
            let events = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, stopping intake");
                    queue.close();
                    break;
                }
                next = queue.recv() => match next {
                    Some(transfer) => {
                        clock.observe(transfer.timestamp);
                        match engine.process(&transfer) {
                            Ok(events) => {
                                summary.processed += 1;
                                events
                            }
                            Err(e) if e.is_input_error() => {
                                warn!(error = %e, "Transfer rejected");
                                summary.rejected += 1;
                                continue;
                            }
                            Err(e) => return Err(e),
                        }
                    }
                    None => break,
                },
                _ = tick.tick(), if !clock.is_replay() => match clock.now() {
                    Some(now) => engine.advance(now),
                    None => continue,
                },
            };

            for event in &events {
                summary.count(event);
                sink.emit(event)?;
            }
        }

        sink.flush()?;

        let stats = producer
            .await
            .map_err(|e| Error::Internal(format!("intake task failed: {}", e)))?;
        summary.rejected += stats.rejected;
        summary.duplicates = stats.duplicates;
        summary.dropped = queue.dropped_count();
        summary.episodes = engine.state().episode_id();
        summary.final_state = engine.state().state();

        info!(
            processed = summary.processed,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            dropped = summary.dropped,
            transitions = summary.transition_events,
            state = %summary.final_state,
            "Session finished"
        );
        Ok(summary)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn input(lines: &[&str]) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(lines.join("\n").into_bytes()))
    }

    #[test]
    fn test_recent_references_bounded() {
        let mut recent = RecentReferences::new(2);
        assert!(recent.insert("a"));
        assert!(!recent.insert("a"));
        assert!(recent.insert("b"));
        assert!(recent.insert("c"));
        assert_eq!(recent.len(), 2);
        // "a" aged out
        assert!(recent.insert("a"));
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let mut engine = IntelligenceEngine::new(&Config::default());
        let events = engine
            .process(&TransferEvent::new(
                "A",
                crate::stream::transfer::Direction::In,
                rust_decimal_macros::dec!(12),
                0,
                "sig",
            ))
            .unwrap();

        let mut sink = JsonlSink::new(Vec::new());
        for event in &events {
            sink.emit(event).unwrap();
        }
        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out.lines().count(), events.len());
        assert!(out.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
    }

    #[tokio::test]
    async fn test_replay_session_counts() {
        let config = Config::default();
        let mut engine = IntelligenceEngine::new(&config);
        let mut sink = MemorySink::default();

        let reader = input(&[
            r#"{"wallet":"A","direction":"buy","amount":"12","timestamp":100,"signature":"s1"}"#,
            r#"{"wallet":"A","direction":"buy","amount":"12","timestamp":100,"signature":"s1"}"#,
            r#"not json"#,
            r#"{"wallet":"B","direction":"sideways","amount":"1","timestamp":101,"signature":"s2"}"#,
            r#"{"wallet":"C","direction":"sell","amount":"-4","timestamp":102,"signature":"s3"}"#,
            "",
            r#"{"wallet":"D","direction":"in","amount":"3","timestamp":103,"signature":"s4"}"#,
        ]);

        let summary = run_session(
            &config,
            &mut engine,
            ChainClock::replay(),
            reader,
            &mut sink,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.rejected, 3);
        assert_eq!(summary.threshold_events, 1);
        assert_eq!(summary.episodes, 1);
        assert_eq!(summary.final_state, LifecycleState::Ignition);
        assert_eq!(sink.events.len() as u64, summary.threshold_events + summary.signal_events + summary.transition_events);
    }

    #[tokio::test]
    async fn test_cancelled_session_stops() {
        let config = Config::default();
        let mut engine = IntelligenceEngine::new(&config);
        let mut sink = MemorySink::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // a reader that never yields a line
        let (reader, _writer) = tokio::io::duplex(64);
        let summary = run_session(
            &config,
            &mut engine,
            ChainClock::live(),
            BufReader::new(reader),
            &mut sink,
            cancel,
        )
        .await
        .unwrap();

        assert_eq!(summary.processed, 0);
        assert!(sink.events.is_empty());
    }
}
