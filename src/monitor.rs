//! Optional push of scalar training metrics to an external HTTP collector.
//!
//! Strictly fire-and-forget: a missing or dying collector must never stall
//! or abort a training run, so failures are logged once and then ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;

pub struct Monitor {
    inner: Option<Inner>,
}

struct Inner {
    endpoint: String,
    run_id: String,
    client: reqwest::blocking::Client,
    unreachable: AtomicBool,
}

impl Monitor {
    pub fn new(endpoint: Option<String>, run_id: &str) -> Self {
        let inner = endpoint.map(|endpoint| Inner {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            run_id: run_id.to_owned(),
            client: reqwest::blocking::Client::builder()
                .timeout(Duration::from_secs(1))
                .build()
                .unwrap_or_default(),
            unreachable: AtomicBool::new(false),
        });
        Self { inner }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn scalar(&self, tag: &str, step: usize, value: f32) {
        let Some(inner) = &self.inner else {
            return;
        };
        let payload = json!({
            "run": inner.run_id,
            "tag": tag,
            "step": step,
            "value": value,
        });
        let result = inner
            .client
            .post(format!("{}/scalars", inner.endpoint))
            .json(&payload)
            .send()
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => {
                inner.unreachable.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                // warn on the first failure only, then stay quiet
                if !inner.unreachable.swap(true, Ordering::Relaxed) {
                    log::warn!("metric collector unreachable: {e}");
                }
                log::debug!("dropped metric {tag}={value} at step {step}");
            }
        }
    }
}
