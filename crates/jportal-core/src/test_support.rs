//! Test doubles for the transport and codec seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use crate::codec::{CodecError, PayloadCodec};

/// Codec that wraps payloads in a marker object and numbers identity tokens.
#[derive(Default)]
pub struct SequentialCodec {
    counter: AtomicUsize,
}

#[async_trait]
impl PayloadCodec for SequentialCodec {
    async fn encode(&self, payload: &Value) -> Result<String, CodecError> {
        Ok(json!({ "encoded": payload }).to_string())
    }

    async fn generate_identity_token(&self) -> Result<String, CodecError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("local-{}", n))
    }
}

/// Extract the original payload from a body produced by [`SequentialCodec`].
pub fn decode_body(body: &str) -> Value {
    let wrapped: Value = serde_json::from_str(body).expect("body is JSON");
    wrapped["encoded"].clone()
}

/// Transport that replays queued responses and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, body: Value) -> &Self {
        self.push_raw(status, &body.to_string())
    }

    pub fn push_raw(&self, status: u16, body: &str) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
        self
    }

    pub fn push_error(&self, err: TransportError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    /// Queue a `Success` envelope around `response`.
    pub fn push_success(&self, response: Value) -> &Self {
        self.push(
            200,
            json!({
                "status": {"responseStatus": "Success", "responseStatusCode": 200},
                "response": response
            }),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("no scripted response".to_string())))
    }
}
