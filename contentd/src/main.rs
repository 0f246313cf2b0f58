//! contentd - CLI entry point

use clap::Parser;
use eyre::{Context, Result};
use std::sync::Arc;
use tracing::info;

use taskstore::{ResultStore, SqliteStore, TaskStore};

use contentd::api::{self, ApiState};
use contentd::cli::{Cli, Command, OutputFormat};
use contentd::config::Config;
use contentd::domain::{CreateTaskRequest, JobPayload};
use contentd::executor::SyncExecutor;
use contentd::quality::{Evaluator, QualityGate};
use contentd::queue::JobQueue;
use contentd::scheduler::Scheduler;
use contentd::services::Services;
use contentd::worker::WorkerPool;
use contentd::workflow::{RetryPolicy, WorkflowEngine, article_workflow};
use taskstore::TaskMode;

fn setup_logging(verbose: bool) {
    let default_level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();
}

/// Everything a command needs, built from config
struct Runtime {
    store: Arc<dyn TaskStore>,
    results: Arc<dyn ResultStore>,
    queue: Arc<JobQueue>,
    scheduler: Arc<Scheduler>,
}

impl Runtime {
    fn open(config: &Config) -> Result<Self> {
        let sqlite = Arc::new(
            SqliteStore::open(&config.store.db_path)
                .context(format!("Failed to open task store at {}", config.store.db_path.display()))?,
        );
        let store: Arc<dyn TaskStore> = sqlite.clone();
        let results: Arc<dyn ResultStore> = sqlite;
        let queue = Arc::new(JobQueue::new(config.queue.clone()));
        let scheduler = Arc::new(Scheduler::new(store.clone(), queue.clone()));
        Ok(Self {
            store,
            results,
            queue,
            scheduler,
        })
    }

    /// Wire the article workflow against live service adapters
    fn engine(&self, config: &Config) -> Result<Arc<WorkflowEngine>> {
        config.validate()?;
        let services = Services::from_config(config)?;
        let evaluator = Evaluator::new(services.llm.clone(), config.quality.pass_threshold);
        let gate = Arc::new(QualityGate::new(evaluator, self.results.clone(), config.quality.rubric_version.clone()));
        let workflow = article_workflow(&services, gate, config);
        Ok(Arc::new(WorkflowEngine::new(
            workflow,
            self.store.clone(),
            RetryPolicy::from(&config.workflow),
        )))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Create {
            topic,
            requirements,
            audience,
            keywords,
            tone,
            min_words,
            max_words,
            mode,
            priority,
            image_size,
            idempotency_key,
        } => {
            let runtime = Runtime::open(&config)?;
            let hard_constraints = (min_words.is_some() || max_words.is_some() || !keywords.is_empty()).then(|| {
                taskstore::HardConstraints {
                    min_words,
                    max_words,
                    keywords: keywords.clone(),
                    require_all_keywords: true,
                    ..Default::default()
                }
            });
            let request = CreateTaskRequest {
                topic,
                requirements,
                target_audience: audience,
                keywords,
                tone,
                mode,
                priority,
                hard_constraints,
                image_size,
                idempotency_key,
                schedule_at: None,
            };

            match mode {
                TaskMode::Sync => {
                    let engine = runtime.engine(&config)?;
                    let executor = SyncExecutor::new(runtime.store.clone(), runtime.results.clone(), engine);
                    let result = executor.execute(request, None).await?;

                    println!("task:     {}", result.task_id);
                    println!("status:   {}", result.status);
                    println!("duration: {}ms", result.duration_ms);
                    println!("tokens:   {}", result.metadata.tokens_used);
                    println!("cost:     ${:.4}", result.metadata.cost);
                    if let Some(content) =
                        result.final_state.final_article_content.or(result.final_state.article_content)
                    {
                        println!("\n{}", content);
                    }
                    if result.status != taskstore::TaskStatus::Completed {
                        if let Some(error) = result.final_state.error {
                            eyre::bail!("task ended {}: {}", result.status, error);
                        }
                        eyre::bail!("task ended {}", result.status);
                    }
                }
                TaskMode::Async => {
                    let task_id = runtime.scheduler.schedule_task(request).await?;
                    println!("{}", task_id);
                    info!(task_id, "task scheduled; run `contentd serve` to process it");
                }
            }
        }

        Command::Status { task_id } => {
            let runtime = Runtime::open(&config)?;
            let task = runtime
                .store
                .find_by_id(&task_id)
                .await?
                .ok_or_else(|| eyre::eyre!("task not found: {}", task_id))?;

            println!("task:     {}", task.id);
            println!("status:   {}", task.status);
            println!("topic:    {}", task.topic);
            if let Some(step) = &task.current_step {
                println!("step:     {}", step);
            }
            println!("retries:  text={} image={}", task.text_retry_count, task.image_retry_count);
            if let Some(error) = &task.error_message {
                println!("error:    {}", error);
            }
        }

        Command::Result { task_id, format } => {
            let runtime = Runtime::open(&config)?;
            let task = runtime
                .store
                .find_by_id(&task_id)
                .await?
                .ok_or_else(|| eyre::eyre!("task not found: {}", task_id))?;
            let results = runtime.results.find_results_by_task_id(&task_id).await?;

            match format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&serde_json::json!({
                            "task_id": task.id,
                            "status": task.status.to_string(),
                            "results": results,
                        }))?
                    );
                }
                OutputFormat::Text => {
                    for result in &results {
                        println!("--- {} ---", result.result_type);
                        if let Some(content) = &result.content {
                            println!("{}", content);
                        }
                        if let Some(path) = &result.file_path {
                            println!("(saved to {})", path);
                        }
                    }
                    if results.is_empty() {
                        println!("no results yet (status: {})", task.status);
                    }
                }
            }
        }

        Command::Cancel { task_id } => {
            let runtime = Runtime::open(&config)?;
            if runtime.scheduler.cancel_task(&task_id).await? {
                println!("cancelled {}", task_id);
            } else {
                eyre::bail!("task {} is not pending, cannot cancel", task_id);
            }
        }

        Command::Serve { bind } => {
            let runtime = Runtime::open(&config)?;
            let engine = runtime.engine(&config)?;

            // Requeue tasks that were pending when the last process exited
            let pending = runtime.store.get_pending_tasks(1_000).await?;
            if !pending.is_empty() {
                info!(count = pending.len(), "requeueing pending tasks");
                for task in &pending {
                    runtime
                        .queue
                        .add_task(JobPayload::from_task(task), task.priority.queue_value(), None);
                }
            }

            let pool = Arc::new(WorkerPool::new(
                config.worker.concurrency,
                config.worker.rate_limit_per_sec,
                runtime.queue.clone(),
                runtime.store.clone(),
                runtime.results.clone(),
                engine.clone(),
            ));
            let pool_handle = tokio::spawn(pool.clone().run());

            let executor = Arc::new(SyncExecutor::new(runtime.store.clone(), runtime.results.clone(), engine));
            let api_state = Arc::new(ApiState {
                executor,
                scheduler: runtime.scheduler.clone(),
                store: runtime.store.clone(),
                results: runtime.results.clone(),
            });

            let bind = bind.unwrap_or_else(|| config.api.bind.clone());
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .context(format!("Failed to bind {}", bind))?;

            tokio::select! {
                result = api::serve(listener, api_state) => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                }
            }

            pool.shutdown();
            pool_handle.await.context("worker pool panicked")?;
        }

        Command::Health => {
            config.validate()?;
            let services = Services::from_config(&config)?;

            match services.llm.health_check().await {
                Ok(()) => println!("llm:    ok"),
                Err(e) => {
                    println!("llm:    FAILED ({})", e);
                    eyre::bail!("llm adapter unhealthy");
                }
            }
            match services.search.health_check().await {
                Ok(()) => println!("search: ok"),
                Err(e) => println!("search: degraded ({})", e),
            }
            match &services.image {
                Some(image) => match image.health_check().await {
                    Ok(()) => println!("image:  ok"),
                    Err(e) => println!("image:  degraded ({})", e),
                },
                None => println!("image:  disabled"),
            }
        }
    }

    Ok(())
}
