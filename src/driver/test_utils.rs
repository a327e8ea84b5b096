//! Scripted in-process driver for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Connector, Cursor, Session, SessionProfile};
use crate::cell::RawCell;
use crate::error::{Error, Result};

pub const FAKE_VERSION_QUERY: &str = "SELECT version FROM engine";

/// Canned response for one SQL text.
#[derive(Debug, Clone)]
pub enum Scripted {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<RawCell>>,
        /// Index of a row whose fetch fails with `RowScanFailed`.
        fail_at: Option<usize>,
    },
    QueryError(String),
    Panic,
}

impl Scripted {
    pub fn rows(columns: &[&str], rows: Vec<Vec<RawCell>>) -> Self {
        Scripted::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            fail_at: None,
        }
    }

    pub fn version(version: &str) -> Self {
        Self::rows(&["VERSION"], vec![vec![RawCell::Text(version.to_string())]])
    }
}

/// Counters shared by a fake connector and the sessions it opens.
#[derive(Debug, Default)]
pub struct Calls {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub queries: Mutex<Vec<String>>,
}

impl Calls {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeConnector {
    pub fail_connect: bool,
    pub script: HashMap<String, Scripted>,
    pub calls: Arc<Calls>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, sql: &str, response: Scripted) -> Self {
        self.script.insert(sql.to_string(), response);
        self
    }

    pub fn failing_connect() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn open(&self) -> Box<dyn Session> {
        self.connect("fake", &SessionProfile::default()).unwrap()
    }
}

impl Connector for FakeConnector {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn connect(&self, locator: &str, _profile: &SessionProfile) -> Result<Box<dyn Session>> {
        if self.fail_connect {
            return Err(Error::ConnectFailed {
                locator: locator.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.calls.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            calls: self.calls.clone(),
        }))
    }

    fn version_query(&self) -> &str {
        FAKE_VERSION_QUERY
    }
}

struct FakeSession {
    script: HashMap<String, Scripted>,
    calls: Arc<Calls>,
}

impl Session for FakeSession {
    fn query(
        &mut self,
        sql: &str,
        scan: &mut dyn FnMut(&mut dyn Cursor) -> Result<()>,
    ) -> Result<()> {
        self.calls.queries.lock().unwrap().push(sql.to_string());
        match self.script.get(sql).cloned() {
            Some(Scripted::Rows {
                columns,
                rows,
                fail_at,
            }) => {
                let mut cursor = FakeCursor {
                    columns,
                    rows: rows.into_iter(),
                    fail_at,
                    next_index: 0,
                };
                scan(&mut cursor)
            }
            Some(Scripted::QueryError(message)) => Err(Error::QueryFailed { message }),
            Some(Scripted::Panic) => panic!("driver exploded"),
            None => Err(Error::QueryFailed {
                message: format!("unexpected query: {sql:?}"),
            }),
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<RawCell>>,
    fail_at: Option<usize>,
    next_index: usize,
}

impl Cursor for FakeCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<RawCell>>> {
        let index = self.next_index;
        self.next_index += 1;
        if self.fail_at == Some(index) {
            return Err(Error::RowScanFailed {
                row: index,
                message: "corrupt row".to_string(),
            });
        }
        Ok(self.rows.next())
    }
}
