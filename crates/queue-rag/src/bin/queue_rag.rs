//! queue-rag command line
//!
//! One subcommand per pipeline stage, plus ingestion and client tools.
//! Run a stage with: cargo run -p queue-rag -- pii

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use queue_rag::{
    config::RagConfig,
    generation::{sink, OllamaClient},
    ingestion::IngestPipeline,
    logging,
    processing::{LlmStage, LocalPipeline, PiiStage, RagStage, StageRunner},
    providers::{self, OllamaEmbedder, OllamaLlm},
    queue::{AmqpBroker, MessageBroker},
    retrieval::Retriever,
    server::IntakeServer,
};

#[derive(Parser, Debug)]
#[command(
    name = "queue-rag",
    version,
    about = "Queue-driven RAG pipeline: PII redaction, retrieval and generation stages"
)]
struct Cli {
    /// TOML configuration file (falls back to QUEUE_RAG_CONFIG, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Redact PII from the PII input queue into the retrieval queue
    Pii,
    /// Turn redacted queries into grounded prompts for the LLM queue
    RagCore,
    /// Answer prompts from the LLM queue
    Llm,
    /// Chunk, embed and store a .txt/.md file or directory
    Ingest {
        /// File or directory to ingest
        path: PathBuf,
    },
    /// List vector store collections
    Collections,
    /// Publish text to the PII stage
    Submit {
        /// Text to submit
        text: String,
    },
    /// Send one prompt straight to the LLM and print the answer
    Generate {
        /// Full prompt
        prompt: String,
        /// Model to use instead of llm.generate_model
        #[arg(long)]
        model: Option<String>,
    },
    /// HTTP intake server publishing submissions to the PII stage
    Serve,
    /// Run all three stages in this process, reading queries from stdin
    Pipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RagConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init_tracing(&config.logging)?;

    let shutdown = shutdown_on_ctrl_c();

    match cli.command {
        Command::Pii => {
            let broker = connect(&config).await?;
            let stage = PiiStage::new(broker.clone(), &config.broker.queues);
            StageRunner::new(broker, shutdown).run(&stage).await?;
        }
        Command::RagCore => {
            let retriever = retriever(&config)?;
            let broker = connect(&config).await?;
            let stage = RagStage::new(broker.clone(), retriever, &config.broker.queues);
            StageRunner::new(broker, shutdown).run(&stage).await?;
        }
        Command::Llm => {
            let llm = Arc::new(OllamaLlm::new(&config.llm)?);
            let sink = Arc::from(sink::from_config(&config.sink)?);
            let broker = connect(&config).await?;
            let stage = LlmStage::new(llm, sink, config.broker.queues.llm.clone());
            StageRunner::new(broker, shutdown).run(&stage).await?;
        }
        Command::Ingest { path } => {
            let embedder = Arc::new(OllamaEmbedder::new(&config.embeddings)?);
            let store = providers::vector_store_from_config(&config)?;
            let pipeline = IngestPipeline::from_config(&config, embedder, store)?;

            let report = pipeline
                .ingest_path(&path)
                .await
                .with_context(|| format!("Failed to ingest {}", path.display()))?;
            println!(
                "Ingested {} chunks from {} files into '{}'",
                report.chunks, report.files, report.collection
            );
        }
        Command::Collections => {
            let store = providers::vector_store_from_config(&config)?;
            let collections = store.list_collections().await?;
            if collections.is_empty() {
                println!("No collections found.");
            }
            for info in collections {
                let count = store.count(&info.name).await?;
                let dimension = info
                    .dimension
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!("{}\tdimension={}\tentries={}", info.name, dimension, count);
            }
        }
        Command::Submit { text } => {
            let broker = connect(&config).await?;
            let body = serde_json::to_vec(&serde_json::json!({ "text": text }))?;
            let queue = &config.broker.queues.pii_input;
            let published = broker.publish(queue, &body).await;
            broker.close().await?;
            published?;
            println!("Queued on '{}'", queue);
        }
        Command::Generate { prompt, model } => {
            let client = OllamaClient::for_generation(&config.llm)?;
            let model = model.unwrap_or_else(|| config.llm.generate_model.clone());
            let answer = client.generate(&model, &prompt).await?;
            println!("{}", answer);
        }
        Command::Serve => {
            let broker = connect(&config).await?;
            let server = IntakeServer::new(config.clone(), broker.clone());
            let served = server.start(shutdown).await;
            broker.close().await?;
            served?;
        }
        Command::Pipeline => run_pipeline(&config, shutdown).await?,
    }

    Ok(())
}

/// Cancelled on the first Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            cancel.cancel();
        }
    });
    token
}

async fn connect(config: &RagConfig) -> anyhow::Result<Arc<dyn MessageBroker>> {
    let broker = AmqpBroker::connect(&config.broker).await?;
    Ok(Arc::new(broker))
}

fn retriever(config: &RagConfig) -> anyhow::Result<Retriever> {
    let embedder = Arc::new(OllamaEmbedder::new(&config.embeddings)?);
    let store = providers::vector_store_from_config(config)?;
    Ok(Retriever::from_config(config, embedder, store))
}

/// Each stdin line is one query; its answer is written before the next line is read.
/// A stage that dies ends the run with its error.
async fn run_pipeline(config: &RagConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let llm = Arc::new(OllamaLlm::new(&config.llm)?);
    let sink = Arc::from(sink::from_config(&config.sink)?);
    let mut pipeline = LocalPipeline::start(
        config.broker.queues.clone(),
        config.broker.ack_mode,
        retriever(config)?,
        llm,
        sink,
        shutdown.clone(),
    );

    let fed = feed_stdin(&mut pipeline, &shutdown).await;
    // Stage errors found on stop take precedence
    pipeline.stop().await?;
    fed
}

async fn feed_stdin(pipeline: &mut LocalPipeline, shutdown: &CancellationToken) -> anyhow::Result<()> {
    tracing::info!("Reading queries from stdin, one per line");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        pipeline.submit(&line).await?;
        pipeline.wait_idle().await?;
    }
    Ok(())
}
