//! JSONL output for `gatehouse`. [`JsonlSink`] appends one gateway event per
//! line; [`append_snapshot`] appends a whole [`Snapshot`] as a single line.
//! Always appends; bring your own path and rotation.

use gatehouse::telemetry::{event_to_json, GatewayEvent, TelemetrySink};
use gatehouse::Snapshot;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWriteExt;

/// Telemetry sink writing each [`GatewayEvent`] as a JSON object on its own line.
#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl tower_service::Service<GatewayEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GatewayEvent) -> Self::Future {
        let path = self.path.clone();
        let line = event_to_json(&event).to_string() + "\n";
        Box::pin(async move {
            let result = append_line(&path, &line).await;
            if let Err(err) = &result {
                tracing::warn!(
                    target: "gatehouse::jsonl",
                    path = %path.display(),
                    %err,
                    "append failed"
                );
            }
            result
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}

/// Append `snapshot` to `path` as one JSON line, creating the file if needed.
pub async fn append_snapshot(path: impl AsRef<Path>, snapshot: &Snapshot) -> io::Result<()> {
    let line = serde_json::to_string(snapshot)? + "\n";
    append_line(path.as_ref(), &line).await
}

async fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
