//! All three stages in one process over the in-memory broker

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AckMode, QueueNames};
use crate::error::{Error, Result};
use crate::generation::AnswerSink;
use crate::providers::LlmProvider;
use crate::queue::{InMemoryBroker, MessageBroker};
use crate::retrieval::Retriever;

use super::{LlmStage, PiiStage, RagStage, StageRunner};

const IDLE_POLL: Duration = Duration::from_millis(50);

/// Running single-process pipeline
pub struct LocalPipeline {
    hub: InMemoryBroker,
    queues: QueueNames,
    shutdown: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
    /// First stage seen to exit on its own
    stopped: Option<&'static str>,
}

impl LocalPipeline {
    /// Spawn the PII, retrieval and generation stages, each with its own broker handle
    pub fn start(
        queues: QueueNames,
        ack_mode: AckMode,
        retriever: Retriever,
        llm: Arc<dyn LlmProvider>,
        sink: Arc<dyn AnswerSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let hub = InMemoryBroker::new(ack_mode);
        let mut tasks = Vec::with_capacity(3);

        let broker = Arc::new(hub.connect());
        let stage = PiiStage::new(broker.clone(), &queues);
        let runner = StageRunner::new(broker, shutdown.clone());
        tasks.push(("pii", tokio::spawn(async move { runner.run(&stage).await })));

        let broker = Arc::new(hub.connect());
        let stage = RagStage::new(broker.clone(), retriever, &queues);
        let runner = StageRunner::new(broker, shutdown.clone());
        tasks.push(("rag-core", tokio::spawn(async move { runner.run(&stage).await })));

        let stage = LlmStage::new(llm, sink, queues.llm.clone());
        let runner = StageRunner::new(Arc::new(hub.connect()), shutdown.clone());
        tasks.push(("llm", tokio::spawn(async move { runner.run(&stage).await })));

        Self {
            hub,
            queues,
            shutdown,
            tasks,
            stopped: None,
        }
    }

    /// Hand text to the PII stage, as a client would.
    ///
    /// Fails once any stage has exited, since nothing would answer.
    pub async fn submit(&self, text: &str) -> Result<()> {
        self.ensure_running()?;
        let body = serde_json::to_vec(&serde_json::json!({ "text": text }))?;
        self.hub.publish(&self.queues.pii_input, &body).await
    }

    /// Wait until every submitted message was settled or shutdown was requested.
    ///
    /// A stage that exits in the meantime ends the wait with that stage's error.
    pub async fn wait_idle(&mut self) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            if self.stopped.is_some() {
                return self.ensure_running();
            }
            if let Some(i) = self.tasks.iter().position(|(_, task)| task.is_finished()) {
                let (name, task) = self.tasks.remove(i);
                self.stopped = Some(name);
                return Err(match join_stage(name, task).await {
                    Err(e) => e,
                    Ok(()) => Error::Internal(format!("stage '{}' stopped unexpectedly", name)),
                });
            }
            if self.hub.is_idle() {
                return Ok(());
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    fn ensure_running(&self) -> Result<()> {
        let exited = self
            .stopped
            .or_else(|| self.tasks.iter().find(|(_, task)| task.is_finished()).map(|(name, _)| *name));
        match exited {
            Some(name) => Err(Error::Internal(format!("stage '{}' is no longer running", name))),
            None => Ok(()),
        }
    }

    /// Stop all stages and report the first stage failure
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();

        let mut first_error = None;
        for (name, task) in self.tasks {
            if let Err(e) = join_stage(name, task).await {
                tracing::error!(stage = name, error = %e, "Stage ended with error");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        self.hub.close().await?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn join_stage(name: &'static str, task: JoinHandle<Result<()>>) -> Result<()> {
    task.await
        .map_err(|e| Error::Internal(format!("stage '{}' panicked: {}", name, e)))?
}
