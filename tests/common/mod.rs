//! Local webhook receiver shared by the integration tests

#![allow(dead_code)]

use axum::{Router, body::Bytes, extract::State, http::HeaderMap, http::StatusCode, routing::post};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct Received {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Default)]
struct Inner {
    script: Mutex<VecDeque<u16>>,
    fallback: Mutex<u16>,
    received: Mutex<Vec<Received>>,
    arrived: Notify,
}

/// Answers POST /hooks from a status script, then with the fallback
pub struct WebhookReceiver {
    inner: Arc<Inner>,
    pub url: String,
}

impl WebhookReceiver {
    pub async fn start(script: &[u16], fallback: u16) -> Self {
        let inner = Arc::new(Inner {
            script: Mutex::new(script.iter().copied().collect()),
            fallback: Mutex::new(fallback),
            ..Inner::default()
        });
        let app = Router::new()
            .route("/hooks", post(receive))
            .with_state(inner.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            inner,
            url: format!("http://{}/hooks", addr),
        }
    }

    pub fn set_fallback(&self, status: u16) {
        *self.inner.fallback.lock().unwrap() = status;
    }

    pub fn received(&self) -> Vec<Received> {
        self.inner.received.lock().unwrap().clone()
    }

    /// Wait until at least `n` requests arrived
    pub async fn wait_for(&self, n: usize) -> Vec<Received> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let notified = self.inner.arrived.notified();
                let got = self.received();
                if got.len() >= n {
                    return got;
                }
                notified.await;
            }
        })
        .await
        .expect("webhook did not arrive in time")
    }
}

async fn receive(State(inner): State<Arc<Inner>>, headers: HeaderMap, body: Bytes) -> StatusCode {
    inner.received.lock().unwrap().push(Received { headers, body });
    let next = inner.script.lock().unwrap().pop_front();
    let status = next.unwrap_or_else(|| *inner.fallback.lock().unwrap());
    inner.arrived.notify_waiters();
    StatusCode::from_u16(status).unwrap()
}
