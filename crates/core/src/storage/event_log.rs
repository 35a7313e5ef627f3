use crate::events::{EventLog, WorkflowEvent};
use crate::types::WorkflowId;
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Event log that keeps everything in memory. Useful for tests and for
/// embedders that forward events elsewhere.
pub struct InMemoryEventLog {
    events: RwLock<Vec<WorkflowEvent>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, event: WorkflowEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn workflow_events(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

/// Durable event log using compressed JSONL, one file per workflow:
/// `events/<workflow_id>.jsonl.gz`.
pub struct JsonlEventLog {
    base_path: PathBuf,
    // Events not yet written out; flushed on a size threshold and on read.
    buffer: RwLock<Vec<WorkflowEvent>>,
}

const FLUSH_THRESHOLD: usize = 64;

impl JsonlEventLog {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("events"))
            .context("Failed to create event log directory")?;
        Ok(Self {
            base_path,
            buffer: RwLock::new(Vec::new()),
        })
    }

    fn event_log_path(&self, workflow_id: &WorkflowId) -> PathBuf {
        self.base_path
            .join("events")
            .join(format!("{}.jsonl.gz", workflow_id))
    }

    /// Write buffered events to their per-workflow files.
    pub async fn flush(&self) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        if buffer.is_empty() {
            return Ok(());
        }

        let mut by_workflow: HashMap<WorkflowId, Vec<WorkflowEvent>> = HashMap::new();
        for event in buffer.drain(..) {
            by_workflow.entry(event.workflow_id).or_default().push(event);
        }

        for (workflow_id, events) in by_workflow {
            let path = self.event_log_path(&workflow_id);

            let mut all_events = if path.exists() {
                read_jsonl_gz(&path)?
            } else {
                Vec::new()
            };
            all_events.extend(events);

            write_jsonl_gz(&path, &all_events)?;
        }

        Ok(())
    }
}

fn read_jsonl_gz(path: &PathBuf) -> Result<Vec<WorkflowEvent>> {
    use flate2::read::GzDecoder;
    use std::io::BufRead;

    let file = std::fs::File::open(path).context("Failed to open event log")?;
    let decoder = GzDecoder::new(file);
    let reader = std::io::BufReader::new(decoder);

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read line from event log")?;
        let event: WorkflowEvent =
            serde_json::from_str(&line).context("Failed to parse event")?;
        events.push(event);
    }

    Ok(events)
}

fn write_jsonl_gz(path: &PathBuf, events: &[WorkflowEvent]) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

    for event in events {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        encoder
            .write_all(json.as_bytes())
            .context("Failed to write event")?;
        encoder.write_all(b"\n").context("Failed to write newline")?;
    }

    let compressed = encoder.finish().context("Failed to finish compression")?;
    std::fs::write(path, compressed).context("Failed to write event log file")?;

    Ok(())
}

#[async_trait::async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: WorkflowEvent) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        buffer.push(event);

        if buffer.len() > FLUSH_THRESHOLD {
            drop(buffer);
            self.flush().await?;
        }

        Ok(())
    }

    async fn workflow_events(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowEvent>> {
        // Flush any buffered events first
        self.flush().await?;

        let path = self.event_log_path(&workflow_id);
        let mut events = if path.exists() {
            read_jsonl_gz(&path)?
        } else {
            Vec::new()
        };

        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WorkflowEventKind;
    use crate::types::JobId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_event_log_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();

        let workflow_id = WorkflowId::new();
        log.append(WorkflowEvent::new(
            workflow_id,
            WorkflowEventKind::WorkflowStarted {
                name: "deploy".to_string(),
                job_count: 1,
            },
        ))
        .await
        .unwrap();
        log.append(WorkflowEvent::new(
            workflow_id,
            WorkflowEventKind::JobFinished {
                job_id: JobId::new("build"),
            },
        ))
        .await
        .unwrap();

        let events = log.workflow_events(workflow_id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].kind,
            WorkflowEventKind::WorkflowStarted { .. }
        ));
    }

    #[tokio::test]
    async fn test_events_partitioned_by_workflow() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();

        let first = WorkflowId::new();
        let second = WorkflowId::new();
        log.append(WorkflowEvent::new(
            first,
            WorkflowEventKind::WorkflowSucceeded,
        ))
        .await
        .unwrap();
        log.append(WorkflowEvent::new(
            second,
            WorkflowEventKind::WorkflowFailed { failed_job: None },
        ))
        .await
        .unwrap();

        let events = log.workflow_events(first).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].kind,
            WorkflowEventKind::WorkflowSucceeded
        ));
    }
}
