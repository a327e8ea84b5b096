//! One collection cycle: connect, pick the query, scan, map.
//!
//! A cycle moves through `Idle → Connecting → (QueryResolved |
//! ConnectFailed) → Collecting → (Collected | CollectFailed) → Closed`.
//! Whatever happens, a failed cycle yields exactly one `{status: "OFFLINE"}`
//! event plus an error, and a connection that was opened is closed exactly
//! once.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::driver::{Connector, Session, SessionProfile};
use crate::error::{Error, Result};
use crate::scan::scan;
use crate::schema::{Event, Schema};
use crate::version::VersionRange;

/// A query that only applies to a range of engine versions.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryVariant {
    pub range: VersionRange,
    pub sql: String,
}

impl QueryVariant {
    pub fn new(low: &str, high: &str, sql: impl Into<String>) -> Self {
        Self {
            range: VersionRange::new(low, high),
            sql: sql.into(),
        }
    }
}

/// The query text of a metric set.
#[derive(Debug, Clone, PartialEq)]
pub enum QuerySource {
    /// One query for every engine version.
    Fixed(String),
    /// Version-gated variants, checked in order; the first match wins.
    Versioned {
        variants: Vec<QueryVariant>,
        fallback: Option<String>,
    },
}

impl QuerySource {
    /// Pick the query for `version`.
    pub fn select(&self, version: &str) -> Result<&str> {
        match self {
            QuerySource::Fixed(sql) => Ok(sql),
            QuerySource::Versioned { variants, fallback } => variants
                .iter()
                .find(|v| v.range.contains(version))
                .map(|v| v.sql.as_str())
                .or(fallback.as_deref())
                .ok_or_else(|| Error::NoMatchingQueryVariant {
                    version: version.to_string(),
                }),
        }
    }

    pub fn is_versioned(&self) -> bool {
        matches!(self, QuerySource::Versioned { .. })
    }
}

/// States of a collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Connecting,
    ConnectFailed,
    QueryResolved,
    Collecting,
    Collected,
    CollectFailed,
    Closed,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Outcome of one cycle.
#[derive(Debug)]
pub struct CycleResult {
    /// Mapped events, or the single offline event of a failed cycle.
    pub events: Vec<Event>,
    /// Why the cycle failed, with cycle context attached.
    pub error: Option<anyhow::Error>,
    /// The terminal state reached before the connection was closed.
    pub state: CycleState,
    pub elapsed: Duration,
}

impl CycleResult {
    fn collected(events: Vec<Event>, started: Instant) -> Self {
        Self {
            events,
            error: None,
            state: CycleState::Collected,
            elapsed: started.elapsed(),
        }
    }

    fn failed(state: CycleState, error: anyhow::Error, started: Instant) -> Self {
        Self {
            events: vec![Event::offline()],
            error: Some(error),
            state,
            elapsed: started.elapsed(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Collects one metric set from a database engine.
pub struct MetricCollector {
    name: String,
    connector: Arc<dyn Connector>,
    query: QuerySource,
    schema: Schema,
    profile: SessionProfile,
}

impl MetricCollector {
    pub fn new(
        name: impl Into<String>,
        connector: Arc<dyn Connector>,
        query: QuerySource,
        schema: Schema,
    ) -> Self {
        Self {
            name: name.into(),
            connector,
            query,
            schema,
            profile: SessionProfile::default(),
        }
    }

    /// Pin these session settings on every connection.
    pub fn with_profile(mut self, profile: SessionProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &'static str {
        self.connector.name()
    }

    /// Run one collection cycle against `locator`.
    ///
    /// Panics inside the cycle are caught and reported as a failed cycle.
    pub fn fetch(&self, locator: &str) -> CycleResult {
        let started = Instant::now();
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle(locator, started))) {
            Ok(result) => result,
            Err(payload) => {
                let err = Error::CyclePanicked {
                    message: panic_message(payload.as_ref()),
                };
                tracing::error!("{} cycle on {locator} aborted: {err}", self.name);
                CycleResult::failed(
                    CycleState::CollectFailed,
                    anyhow::Error::new(err)
                        .context(format!("{} fetch failed on {locator}", self.name)),
                    started,
                )
            }
        }
    }

    fn run_cycle(&self, locator: &str, started: Instant) -> CycleResult {
        self.trace_state(CycleState::Connecting, locator);
        let session = match self.connector.connect(locator, &self.profile) {
            Ok(session) => session,
            Err(e) => {
                self.trace_state(CycleState::ConnectFailed, locator);
                let err = anyhow::Error::new(e)
                    .context(format!("{} open db connection failed on {locator}", self.name));
                return CycleResult::failed(CycleState::ConnectFailed, err, started);
            }
        };

        let mut guard = SessionGuard::new(session);
        let collected = self.collect(guard.session(), locator);
        guard.close();
        self.trace_state(CycleState::Closed, locator);

        match collected {
            Ok(events) => CycleResult::collected(events, started),
            Err(e) => CycleResult::failed(
                CycleState::CollectFailed,
                anyhow::Error::new(e)
                    .context(format!("{} fetch failed on {locator}", self.name)),
                started,
            ),
        }
    }

    fn collect(&self, session: &mut dyn Session, locator: &str) -> Result<Vec<Event>> {
        let sql = self.resolve_query(session)?;
        self.trace_state(CycleState::QueryResolved, locator);

        self.trace_state(CycleState::Collecting, locator);
        let rows = match scan(session, sql) {
            Ok(rows) => rows,
            Err(e) => {
                self.trace_state(CycleState::CollectFailed, locator);
                return Err(e);
            }
        };

        let events: Vec<Event> = rows.iter().map(|row| self.schema.apply(row)).collect();
        self.trace_state(CycleState::Collected, locator);
        Ok(events)
    }

    fn resolve_query(&self, session: &mut dyn Session) -> Result<&str> {
        match &self.query {
            QuerySource::Fixed(sql) => Ok(sql),
            versioned => {
                let version = probe_version(self.connector.as_ref(), session)?;
                tracing::debug!("{}: engine version {version}", self.name);
                versioned.select(&version)
            }
        }
    }

    fn trace_state(&self, state: CycleState, locator: &str) {
        tracing::trace!("{} on {locator}: {state}", self.name);
    }
}

/// Ask the engine for its version string.
pub fn probe_version(connector: &dyn Connector, session: &mut dyn Session) -> Result<String> {
    let rows = scan(session, connector.version_query())?;
    rows.first()
        .and_then(|row| row.get("VERSION"))
        .map(|v| v.to_text())
        .ok_or_else(|| Error::QueryFailed {
            message: "version probe returned no VERSION column".to_string(),
        })
}

/// Closes the session exactly once: explicitly, or on drop while unwinding.
struct SessionGuard {
    session: Option<Box<dyn Session>>,
}

impl SessionGuard {
    fn new(session: Box<dyn Session>) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn session(&mut self) -> &mut dyn Session {
        self.session
            .as_deref_mut()
            .expect("session is open until the guard is closed")
    }

    fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                tracing::warn!("closing session: {e}");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
