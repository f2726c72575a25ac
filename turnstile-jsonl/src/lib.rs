//! JSONL sink for `turnstile`. Appends one line per endpoint per flushed batch.
//! Bring your own path; the file is created on first write.

use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use turnstile::{MetricsBatch, MetricsSink};

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl tower_service::Service<MetricsBatch> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: MetricsBatch) -> Self::Future {
        let path = self.path.clone();
        let lines = render(&batch);
        let endpoints = batch.len();
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            // Whole batch in a single write.
            file.write_all(lines.as_bytes()).await?;
            file.flush().await?;
            tracing::debug!(target: "turnstile::jsonl", path = %path.display(), endpoints, "batch appended");
            Ok(())
        })
    }
}

impl MetricsSink for JsonlSink {
    type SinkError = io::Error;
}

fn render(batch: &MetricsBatch) -> String {
    let mut out = String::new();
    for metric in &batch.metrics {
        let line = json!({
            "period": batch.period.to_string(),
            "endpoint": metric.endpoint.as_str(),
            "samples": metric.samples,
            "total_latency_ms": metric.total_latency_ms,
            "max_latency_ms": metric.max_latency_ms,
            "average_latency_ms": metric.average_latency_ms(),
            "rejections": metric.rejections,
        });
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}
