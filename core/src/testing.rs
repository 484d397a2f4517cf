//! Recording transport used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AlmaError, Result};
use crate::transport::Transport;

/// Answers from a path-keyed table and records every path it was asked for.
/// Unknown paths fail with HTTP 404.
#[derive(Default)]
pub struct StubTransport {
    responses: Mutex<HashMap<String, Result<Value, (u16, String)>>>,
    calls: Mutex<Vec<String>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, body: Value) {
        self.responses.lock().unwrap().insert(path.to_string(), Ok(body));
    }

    pub fn fail(&self, path: &str, status: u16, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), Err((status, message.to_string())));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn get(&self, path: &str) -> Result<Value> {
        self.calls.lock().unwrap().push(path.to_string());
        match self.responses.lock().unwrap().get(path) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err((status, message))) => Err(AlmaError::Request {
                status: *status,
                message: message.clone(),
            }),
            None => Err(AlmaError::Request {
                status: 404,
                message: format!("no stub for {path}"),
            }),
        }
    }
}
