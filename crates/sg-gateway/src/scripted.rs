//! In-memory backend with scripted answers, for tests.

use crate::backend::{GraphBackend, RecordStream};
use crate::GatewayError;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{Map, Value};
use sg_core::Record;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What the backend answers for one query text.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emits the records, then completes.
    Rows(Vec<Record>),
    /// Emits the records, then fails.
    RowsThenError(Vec<Record>, GatewayError),
    /// Emits the records, then never finishes.
    Hang(Vec<Record>),
    /// Emits one record with `column` set to the value of parameter `param`.
    Echo { param: String, column: String },
}

/// A query as it reached the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub text: String,
    pub params: Map<String, Value>,
}

/// Backend that answers from scripts instead of a database.
///
/// Queries without a script fail with a syntax error, like an unknown
/// statement would.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    scripts: HashMap<String, Script>,
    probes: Mutex<VecDeque<Result<(), GatewayError>>>,
    probe_calls: AtomicU32,
    executed: Mutex<Vec<Executed>>,
    closed: AtomicBool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the answer for a query text.
    pub fn with_query(mut self, text: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(text.into(), script);
        self
    }

    /// Queues probe outcomes. Once the queue is empty probes succeed.
    pub fn with_probe_results(self, results: Vec<Result<(), GatewayError>>) -> Self {
        lock(&self.probes).extend(results);
        self
    }

    pub fn probe_calls(&self) -> u32 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    /// Queries received so far, in order.
    pub fn executed(&self) -> Vec<Executed> {
        lock(&self.executed).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphBackend for ScriptedBackend {
    async fn probe(&self) -> Result<(), GatewayError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(GatewayError::Closed);
        }
        lock(&self.probes).pop_front().unwrap_or(Ok(()))
    }

    fn execute(&self, text: &str, params: &Map<String, Value>) -> RecordStream {
        lock(&self.executed).push(Executed {
            text: text.to_string(),
            params: params.clone(),
        });

        if self.is_closed() {
            return stream::iter([Err(GatewayError::Closed)]).boxed();
        }

        match self.scripts.get(text).cloned() {
            Some(Script::Rows(rows)) => stream::iter(rows.into_iter().map(Ok)).boxed(),
            Some(Script::RowsThenError(rows, err)) => stream::iter(rows.into_iter().map(Ok))
                .chain(stream::iter([Err(err)]))
                .boxed(),
            Some(Script::Hang(rows)) => stream::iter(rows.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
            Some(Script::Echo { param, column }) => {
                let value = params.get(&param).cloned().unwrap_or(Value::Null);
                stream::iter([Ok(Record::new().with(column, value))]).boxed()
            }
            None => stream::iter([Err(GatewayError::Query {
                code: "Neo.ClientError.Statement.SyntaxError".to_string(),
                message: format!("Invalid input: {}", text),
            })])
            .boxed(),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
