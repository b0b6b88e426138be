//! Shared test utilities for integration tests.
//!
//! `RecordingPool` is an in-memory `ConnectionPool` that logs every statement
//! it is asked to run. Tests install it with `PoolProvider::set_override_pool`
//! and assert on the recorded sequence.

#![allow(dead_code)]

use async_trait::async_trait;
use bartender_db::db::{ConnectionPool, JsonRow, PoolConnection, QueryParam};
use bartender_db::error::{DbError, DbResult};
use std::sync::{Arc, Mutex};

/// Something a recording connection was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire,
    Statement(String, Vec<QueryParam>),
    Release,
    /// Dropped without ever being released.
    Dropped,
}

#[derive(Debug, Default)]
struct Shared {
    events: Vec<Event>,
    rows: Vec<JsonRow>,
    failures: Vec<(String, DbError)>,
    closed: bool,
    close_calls: usize,
}

/// In-memory pool that records statements instead of running them.
#[derive(Debug, Clone, Default)]
pub struct RecordingPool {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every `fetch_all`.
    pub fn with_rows(self, rows: Vec<JsonRow>) -> Self {
        self.shared.lock().unwrap().rows = rows;
        self
    }

    /// Fail any statement that starts with `prefix`.
    pub fn failing_on(self, prefix: &str, err: DbError) -> Self {
        self.shared
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_string(), err));
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.shared.lock().unwrap().events.clone()
    }

    /// Only the SQL text of recorded statements, in order.
    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Statement(sql, _) => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn release_count(&self) -> usize {
        self.count(|event| matches!(event, Event::Release))
    }

    pub fn dropped_count(&self) -> usize {
        self.count(|event| matches!(event, Event::Dropped))
    }

    pub fn acquire_count(&self) -> usize {
        self.count(|event| matches!(event, Event::Acquire))
    }

    pub fn close_calls(&self) -> usize {
        self.shared.lock().unwrap().close_calls
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|event| pred(event)).count()
    }
}

#[async_trait]
impl ConnectionPool for RecordingPool {
    async fn acquire(&self) -> DbResult<Box<dyn PoolConnection>> {
        let mut shared = self.shared.lock().unwrap();
        if shared.closed {
            return Err(DbError::connection("pool closed", "Create a new pool"));
        }
        shared.events.push(Event::Acquire);
        Ok(Box::new(RecordingConnection {
            shared: Arc::clone(&self.shared),
            released: false,
        }))
    }

    async fn close(&self) -> DbResult<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.closed = true;
        shared.close_calls += 1;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.shared.lock().unwrap().closed
    }
}

pub struct RecordingConnection {
    shared: Arc<Mutex<Shared>>,
    released: bool,
}

impl RecordingConnection {
    fn record(&self, sql: &str, params: &[QueryParam]) -> DbResult<()> {
        let mut shared = self.shared.lock().unwrap();
        shared
            .events
            .push(Event::Statement(sql.to_string(), params.to_vec()));
        match shared
            .failures
            .iter()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
        {
            Some((_, err)) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PoolConnection for RecordingConnection {
    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.record(sql, params)?;
        Ok(1)
    }

    async fn fetch_all(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<JsonRow>> {
        self.record(sql, params)?;
        Ok(self.shared.lock().unwrap().rows.clone())
    }

    async fn release(mut self: Box<Self>) {
        self.released = true;
        self.shared.lock().unwrap().events.push(Event::Release);
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        if !self.released {
            if let Ok(mut shared) = self.shared.lock() {
                shared.events.push(Event::Dropped);
            }
        }
    }
}

/// Build a `JsonRow` from a `json!` object literal.
pub fn row(value: serde_json::Value) -> JsonRow {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
