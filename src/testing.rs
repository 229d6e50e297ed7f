//! Scripted transport for unit tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::cloudstack::{ApiParams, Transport};
use crate::error::{ApiError, Result};
use crate::reconcile::ApiContext;

enum Scripted {
    Reply(Value),
    Fail(String),
}

/// Transport returning scripted responses per command and recording calls.
///
/// Each command has a queue of responses; the last one is reused once the
/// queue is down to a single entry. Unscripted commands succeed with an
/// empty object, which decodes as an empty list.
#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, ApiParams)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a successful response for `command`.
    pub fn reply(&self, command: &str, value: Value) -> &Self {
        self.push(command, Scripted::Reply(value));
        self
    }

    /// Queues a failure for `command`.
    pub fn fail(&self, command: &str, message: &str) -> &Self {
        self.push(command, Scripted::Fail(message.to_string()));
        self
    }

    fn push(&self, command: &str, entry: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(entry);
    }

    pub fn calls(&self) -> Vec<(String, ApiParams)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|(command, _)| command).collect()
    }

    pub fn calls_to(&self, command: &str) -> Vec<ApiParams> {
        self.calls()
            .into_iter()
            .filter(|(c, _)| c == command)
            .map(|(_, params)| params)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn call(&self, command: &str, params: ApiParams) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), params));

        let mut scripts = self.scripts.lock().unwrap();
        let entry = match scripts.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().map(|s| match s {
                Scripted::Reply(v) => Scripted::Reply(v.clone()),
                Scripted::Fail(m) => Scripted::Fail(m.clone()),
            }),
            None => None,
        };

        match entry {
            Some(Scripted::Reply(value)) => Ok(value),
            Some(Scripted::Fail(message)) => Err(ApiError::Rejected {
                command: command.to_string(),
                status: 530,
                code: 530,
                message,
            }
            .into()),
            None => Ok(json!({})),
        }
    }
}

/// Builds a context over a fake transport.
pub fn context(transport: &Arc<FakeTransport>) -> ApiContext {
    ApiContext::new(transport.clone())
}
