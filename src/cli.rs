//! CLI argument definitions and command implementations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use talkdub_config::Config;
use talkdub_engine::phases::standard_phases;
use talkdub_engine::{DeliveryGate, JobWorker, TracingNotifier, api};
use talkdub_job::JobStore;
use talkdub_kv::{
    JobQueue, KeyedStore, PinStore, RateLimiter, RedisQueue, RedisStore, TranslationCache,
};
use talkdub_translate::Translator;
use talkdub_utils::paths::DataLayout;

/// talkdub - dub a video's audio track into another language
#[derive(Parser)]
#[command(name = "talkdub")]
#[command(about = "Durable dubbing pipeline: submit jobs, run workers, deliver artifacts")]
#[command(long_about = r#"
talkdub ingests a video URL and produces a dubbed audio track in a different
language, driven through a fixed sequence of phases (download, normalize,
separation, recognition, translation, synthesis, mixing) with per-phase
retries and PIN-gated delivery.

EXAMPLES:
  # Submit a job
  talkdub submit https://youtu.be/dQw4w9WgXcQ --src ja --tgt en --email user@example.com

  # Check its status
  talkdub status <job-id>

  # Run a worker (one job at a time)
  talkdub worker

  # Release a delivery with the emailed PIN
  talkdub download <job-id> --pin 123456

  # Garbage-collect expired deliveries and stale scratch space
  talkdub cleanup

CONFIGURATION:
  Everything is environment-driven (TALKDUB_* variables); see the README
  for the full list. The queue broker defaults to redis://localhost:6379/0.
"#)]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Submit a new dubbing job
    Submit {
        /// Video URL
        video_url: String,
        /// Source language code
        #[arg(long)]
        src: String,
        /// Target language code
        #[arg(long)]
        tgt: String,
        /// Notification email address
        #[arg(long)]
        email: String,
    },
    /// Show a job's status
    Status {
        /// Job identifier
        job_id: String,
    },
    /// Run the job worker loop
    Worker,
    /// Release a delivery (PIN-gated)
    Download {
        /// Job identifier
        job_id: String,
        /// Six-digit PIN from the delivery email
        #[arg(long)]
        pin: String,
    },
    /// Expire old deliveries, purge failed jobs, drop stale scratch space
    Cleanup,
    /// Show rate-limiter and cache statistics
    Stats,
}

/// Collaborators wired from configuration.
struct Runtime {
    config: Arc<Config>,
    store: JobStore,
    kv: Arc<dyn KeyedStore>,
    queue: Arc<dyn JobQueue>,
}

impl Runtime {
    async fn connect(config: Config) -> Result<Self> {
        let layout = DataLayout::new(config.storage.data_root.clone());
        layout.ensure_dirs()?;

        let kv: Arc<dyn KeyedStore> = Arc::new(
            RedisStore::connect(&config.storage.broker_url)
                .await
                .context("failed to connect to the broker (is redis running?)")?,
        );
        let queue: Arc<dyn JobQueue> = Arc::new(
            RedisQueue::connect(&config.storage.broker_url)
                .await
                .context("failed to connect the job queue")?,
        );

        Ok(Self {
            config: Arc::new(config),
            store: JobStore::new(layout),
            kv,
            queue,
        })
    }

    fn pin_store(&self) -> PinStore {
        PinStore::new(
            Arc::clone(&self.kv),
            self.config.retention.pin,
            self.config.delivery.max_pin_attempts,
        )
    }

    fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            Arc::clone(&self.kv),
            self.config.llm.rpm_limit,
            self.config.llm.rpm_buffer_factor,
        )
    }

    fn translation_cache(&self) -> TranslationCache {
        TranslationCache::new(
            Arc::clone(&self.kv),
            self.config.translation.cache_enabled,
            self.config.translation.cache_ttl,
        )
    }
}

/// Run a parsed CLI invocation to completion.
pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env().context("configuration is invalid")?;

    match cli.command {
        Command::Submit {
            video_url,
            src,
            tgt,
            email,
        } => {
            let rt = Runtime::connect(config).await?;
            let request = api::SubmitRequest {
                video_url,
                src_lang: src,
                tgt_lang: tgt,
                email,
                webhook_url: None,
            };
            match api::submit(&rt.store, &rt.queue, &rt.config, &request).await {
                Ok(response) => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    Ok(())
                }
                Err(e) => Err(anyhow::anyhow!("{e} (HTTP {})", e.http_status())),
            }
        }

        Command::Status { job_id } => {
            let rt = Runtime::connect(config).await?;
            match api::status(&rt.store, &job_id) {
                Ok(status) => {
                    println!("{}", serde_json::to_string_pretty(&status)?);
                    Ok(())
                }
                Err(e) => Err(anyhow::anyhow!("{e} (HTTP {})", e.http_status())),
            }
        }

        Command::Worker => {
            let rt = Runtime::connect(config).await?;
            let backend = talkdub_llm::from_config(&rt.config)
                .context("LLM backend construction failed")?;
            let translator = Arc::new(Translator::new(
                Arc::new(backend),
                rt.rate_limiter(),
                rt.translation_cache(),
                rt.config.translation.clone(),
                "groq",
            ));

            let worker = JobWorker::new(
                rt.store.clone(),
                Arc::clone(&rt.queue),
                rt.pin_store(),
                Arc::new(TracingNotifier),
                standard_phases(translator),
                Arc::clone(&rt.config),
            );

            worker
                .run_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await;
            Ok(())
        }

        Command::Download { job_id, pin } => {
            let rt = Runtime::connect(config).await?;
            let gate = DeliveryGate::new(
                rt.store.clone(),
                rt.pin_store(),
                rt.config.delivery.max_downloads,
            );
            match gate.release(&job_id, &pin).await {
                Ok(artifact) => {
                    println!("archive:        {}", artifact.archive_path);
                    println!("filename:       {}", artifact.filename);
                    println!("download count: {}", artifact.download_count);
                    if let Some(expires) = artifact.expires_at {
                        println!("expires at:     {expires}");
                    }
                    Ok(())
                }
                Err(e) => Err(anyhow::anyhow!("{e} (HTTP {})", e.http_status())),
            }
        }

        Command::Cleanup => {
            let rt = Runtime::connect(config).await?;
            let report = talkdub_engine::cleanup::sweep(
                &rt.store,
                &rt.pin_store(),
                rt.config.retention.failed_job,
                rt.config.retention.temp,
            )
            .await?;
            println!(
                "expired {} deliveries, purged {} failed jobs, removed {} scratch dirs, {} stray PINs",
                report.expired_jobs,
                report.purged_failed_jobs,
                report.removed_temp_dirs,
                report.removed_pins
            );
            Ok(())
        }

        Command::Stats => {
            let rt = Runtime::connect(config).await?;
            let usage = rt.rate_limiter().usage_json().await?;
            let cache_entries = rt.translation_cache().entry_count().await;
            let queue_len = rt.queue.len().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "rate_limiter": usage,
                    "translation_cache_entries": cache_entries,
                    "queue_length": queue_len,
                }))?
            );
            Ok(())
        }
    }
}
