//! Periodic scheduling of collection cycles and event publishing.

use std::io::Write;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use crate::cell::format_timestamp;
use crate::collector::{CycleResult, MetricCollector};

/// Maximum number of cycles run at the same time.
pub const MAX_PARALLEL_CYCLES: usize = 4;

/// Result of one (metricset, host) cycle within a tick.
#[derive(Debug)]
pub struct Report {
    pub module: &'static str,
    pub metricset: String,
    pub host: String,
    pub timestamp: DateTime<Utc>,
    pub result: CycleResult,
}

/// Receives the events of every cycle.
pub trait EventSink {
    fn publish(&mut self, report: &Report) -> Result<()>;
}

/// Writes one JSON document per event, one per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn publish(&mut self, report: &Report) -> Result<()> {
        for event in &report.result.events {
            let mut doc = json!({
                "@timestamp": format_timestamp(&report.timestamp),
                "metricset": {
                    "module": report.module,
                    "name": report.metricset,
                    "host": report.host,
                    "rtt_us": report.result.elapsed.as_micros() as u64,
                },
                report.module: { report.metricset.as_str(): event },
            });
            if let Some(err) = &report.result.error {
                doc["error"] = json!({ "message": format!("{err:#}") });
            }
            serde_json::to_writer(&mut self.out, &doc)?;
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Runs every metric set against every host, once per period.
pub struct Runner {
    collectors: Vec<Arc<MetricCollector>>,
    hosts: Vec<String>,
    period: Duration,
    parallelism: usize,
}

impl Runner {
    pub fn new(collectors: Vec<MetricCollector>, hosts: Vec<String>, period: Duration) -> Self {
        Self {
            collectors: collectors.into_iter().map(Arc::new).collect(),
            hosts,
            period,
            parallelism: MAX_PARALLEL_CYCLES,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Keep only the named metric set and/or host.
    pub fn retain(&mut self, metricset: Option<&str>, host: Option<&str>) {
        if let Some(name) = metricset {
            self.collectors.retain(|c| c.name() == name);
        }
        if let Some(host) = host {
            self.hosts.retain(|h| h == host);
        }
    }

    pub fn cycles_per_tick(&self) -> usize {
        self.collectors.len() * self.hosts.len()
    }

    /// Run one cycle per (metricset, host) pair.
    ///
    /// Reports come back ordered by metric set, then host.
    pub fn tick(&self) -> Vec<Report> {
        let pool = Pool::<ThunkWorker<(usize, Report)>>::new(self.parallelism);
        let (tx, rx) = channel();

        let mut index = 0;
        for collector in &self.collectors {
            for host in &self.hosts {
                let collector = collector.clone();
                let host = host.clone();
                let slot = index;
                pool.execute_to(
                    tx.clone(),
                    Thunk::of(move || {
                        let timestamp = Utc::now();
                        let result = collector.fetch(&host);
                        let report = Report {
                            module: collector.module(),
                            metricset: collector.name().to_string(),
                            host,
                            timestamp,
                            result,
                        };
                        (slot, report)
                    }),
                );
                index += 1;
            }
        }
        drop(tx);

        let mut reports: Vec<(usize, Report)> = rx.iter().take(index).collect();
        reports.sort_by_key(|(slot, _)| *slot);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    /// Tick every period until `stop` fires or `max_ticks` ticks ran.
    ///
    /// Failed cycles are logged and published like any other; the next tick
    /// retries them.
    pub fn run(
        &self,
        sink: &mut dyn EventSink,
        stop: &Receiver<()>,
        max_ticks: Option<u64>,
    ) -> Result<u64> {
        let mut ticks = 0;
        loop {
            let started = Instant::now();
            for report in self.tick() {
                log_report(&report);
                sink.publish(&report)?;
            }
            ticks += 1;
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }

            let wait = self.period.saturating_sub(started.elapsed());
            match stop.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
        Ok(ticks)
    }
}

/// Log the outcome of one cycle: an error line on failure, a summary otherwise.
pub fn log_report(report: &Report) {
    match &report.result.error {
        Some(err) => tracing::error!("{} on {}: {err:#}", report.metricset, report.host),
        None => tracing::info!(
            "{} on {}: {} events in {:?}",
            report.metricset,
            report.host,
            report.result.events.len(),
            report.result.elapsed
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::RawCell;
    use crate::collector::QuerySource;
    use crate::driver::test_utils::{FakeConnector, Scripted};
    use crate::schema::{Rule, Schema, TargetKind};

    const SQL: &str = "SELECT status FROM v$instance";

    fn runner(connector: FakeConnector, hosts: &[&str]) -> Runner {
        let connector = Arc::new(connector);
        let schema = Schema::new().with("status", Rule::field("STATUS", TargetKind::String));
        let collectors = ["status", "fra"]
            .into_iter()
            .map(|name| {
                MetricCollector::new(
                    name,
                    connector.clone(),
                    QuerySource::Fixed(SQL.to_string()),
                    schema.clone(),
                )
            })
            .collect();
        Runner::new(
            collectors,
            hosts.iter().map(|h| h.to_string()).collect(),
            Duration::from_millis(10),
        )
    }

    fn open_rows() -> Scripted {
        Scripted::rows(&["STATUS"], vec![vec![RawCell::Text("OPEN".to_string())]])
    }

    #[test]
    fn test_tick_orders_reports() {
        let runner = runner(FakeConnector::new().respond(SQL, open_rows()), &["a", "b"]);
        let reports = runner.tick();
        let order: Vec<_> = reports
            .iter()
            .map(|r| (r.metricset.as_str(), r.host.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("status", "a"), ("status", "b"), ("fra", "a"), ("fra", "b")]
        );
        assert!(reports.iter().all(|r| r.result.is_ok()));
    }

    #[test]
    fn test_retain_filters() {
        let mut runner = runner(FakeConnector::new().respond(SQL, open_rows()), &["a", "b"]);
        runner.retain(Some("fra"), Some("b"));
        assert_eq!(runner.cycles_per_tick(), 1);
        let reports = runner.tick();
        assert_eq!(reports[0].metricset, "fra");
        assert_eq!(reports[0].host, "b");
    }

    #[test]
    fn test_sink_writes_envelopes() {
        let runner = runner(FakeConnector::new().respond(SQL, open_rows()), &["a"]);
        let mut sink = JsonLinesSink::new(Vec::new());
        let (_tx, rx) = channel();
        let ticks = runner.run(&mut sink, &rx, Some(1)).unwrap();
        assert_eq!(ticks, 1);

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let docs: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["metricset"]["name"], "status");
        assert_eq!(docs[0]["metricset"]["module"], "fake");
        assert_eq!(docs[0]["fake"]["status"]["status"], "OPEN");
        assert!(docs[0].get("error").is_none());
    }

    #[test]
    fn test_failed_cycle_publishes_offline_with_error() {
        let runner = runner(FakeConnector::failing_connect(), &["a"]);
        let mut sink = JsonLinesSink::new(Vec::new());
        let (_tx, rx) = channel();
        runner.run(&mut sink, &rx, Some(1)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let doc: serde_json::Value = serde_json::from_str(out.lines().next().unwrap()).unwrap();
        assert_eq!(doc["fake"]["status"]["status"], "OFFLINE");
        let message = doc["error"]["message"].as_str().unwrap();
        assert!(message.contains("open db connection failed"), "{message}");
    }

    #[test]
    fn test_run_stops_on_signal() {
        let runner = runner(FakeConnector::new().respond(SQL, open_rows()), &["a"]);
        let mut sink = JsonLinesSink::new(Vec::new());
        let (tx, rx) = channel();
        tx.send(()).unwrap();
        let ticks = runner.run(&mut sink, &rx, None).unwrap();
        assert_eq!(ticks, 1);
    }
}
