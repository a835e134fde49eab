//! Wires the subsystems together and owns their lifecycles.
//!
//! Three periodic tasks run independently: sync (hours), cache tick
//! (seconds), display (a minute). Shutdown is ordered: display stops
//! first so no new frames go out, the cache engine settles its writes
//! under a bounded wait, the sync controller's in-flight provider call
//! is cancelled, and the store closes last.

use core_auth::{TokenCache, TokenCacheConfig};
use core_cache::{CacheEngine, CacheEngineConfig};
use core_display::DisplayScheduler;
use core_runtime::events::{CoreEvent, EventBus, FrontEndAck, RecvError};
use core_runtime::{FrameConfig, ProviderKind, ReqwestClient};
use core_store::MetadataStore;
use core_sync::SyncController;
use frame_traits::{CloudProvider, FrameError, HttpClient};
use provider_google_drive::GoogleDriveProvider;
use provider_onedrive::OneDriveProvider;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounded wait for the cache engine's in-flight writes at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build every component from configuration and run until the process
/// receives a shutdown signal.
pub async fn run(config: FrameConfig) -> Result<(), FrameError> {
    let store = MetadataStore::open(&config.store.database_path)
        .await
        .map_err(FrameError::from)?;

    let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new()?);
    let provider = build_provider(&config, http).await?;

    // Auth failures surface here, before any task spawns.
    provider.initialize().await?;

    let events = EventBus::default();
    let shutdown = CancellationToken::new();
    install_signal_handler(shutdown.clone());

    run_components(config, store, provider, events, shutdown).await
}

async fn build_provider(
    config: &FrameConfig,
    http: Arc<dyn HttpClient>,
) -> Result<Arc<dyn CloudProvider>, FrameError> {
    let token_url = match config.provider {
        ProviderKind::GoogleDrive => provider_google_drive::connector::TOKEN_URL,
        ProviderKind::Onedrive => provider_onedrive::connector::TOKEN_URL,
    };

    let token_cache = Arc::new(
        TokenCache::open(
            TokenCacheConfig {
                credentials_path: config.provider_config.credentials_path.clone(),
                token_path: config.provider_config.token_path.clone(),
                token_url: token_url.to_string(),
            },
            http.clone(),
        )
        .await
        .map_err(FrameError::from)?,
    );

    Ok(match config.provider {
        ProviderKind::GoogleDrive => Arc::new(GoogleDriveProvider::new(http, token_cache)),
        ProviderKind::Onedrive => Arc::new(OneDriveProvider::new(http, token_cache)),
    })
}

fn install_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });
}

/// Run the three periodic tasks plus the front-end bridge until the
/// shutdown token fires, then tear down in order.
pub async fn run_components(
    config: FrameConfig,
    store: MetadataStore,
    provider: Arc<dyn CloudProvider>,
    events: EventBus,
    shutdown: CancellationToken,
) -> Result<(), FrameError> {
    let cache_engine = Arc::new(
        CacheEngine::new(
            CacheEngineConfig {
                max_cache_bytes: config.max_cache_bytes(),
                prefetch_batch: config.prefetch_batch_size,
                download_timeout: Duration::from_secs(30),
                show_width: config.show_width,
                show_height: config.show_height,
                jpeg_quality: config.jpeg_quality,
                use_blob_storage: config.use_blob_storage,
                cache_dir: config.cache_path.clone(),
                normalize_images: true,
            },
            &store,
            provider.clone(),
            events.clone(),
        )
        .await
        .map_err(|e| FrameError::Unknown(e.to_string()))?,
    );
    cache_engine
        .reconcile()
        .await
        .map_err(|e| FrameError::Unknown(e.to_string()))?;

    let sync = Arc::new(SyncController::new(
        provider.clone(),
        &store,
        events.clone(),
        config.provider_config.folders.clone(),
    ));
    let display = Arc::new(DisplayScheduler::new(
        &store,
        events.clone(),
        config.update_interval(),
    ));

    let bridge_token = shutdown.child_token();
    let bridge = spawn_front_end_bridge(events.clone(), bridge_token);

    // Display scheduler.
    let display_token = CancellationToken::new();
    let display_task = {
        let display = display.clone();
        spawn_periodic(
            "display",
            config.update_interval(),
            display_token.clone(),
            move || {
                let display = display.clone();
                async move {
                    display.tick().await.map(|_| ()).map_err(FrameError::from)
                }
            },
        )
    };

    // Cache engine.
    let cache_token = CancellationToken::new();
    let cache_task = {
        let engine = cache_engine.clone();
        spawn_periodic(
            "cache",
            config.cache_tick_interval(),
            cache_token.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    engine
                        .tick()
                        .await
                        .map(|report| {
                            if report.dropped {
                                debug!("Cache tick dropped (single-flight)");
                            }
                        })
                        .map_err(|e| FrameError::Unknown(e.to_string()))
                }
            },
        )
    };

    // Sync controller. The first interval tick fires immediately, which
    // doubles as the startup scan.
    let sync_token = CancellationToken::new();
    let sync_task = {
        let sync = sync.clone();
        let events = events.clone();
        let token = sync_token.clone();
        spawn_periodic(
            "sync",
            config.scan_interval(),
            sync_token.clone(),
            move || {
                let sync = sync.clone();
                let events = events.clone();
                let token = token.clone();
                async move {
                    match sync.run_scan(&token).await {
                        Ok(outcome) => {
                            debug!(?outcome, "Scan finished");
                            Ok(())
                        }
                        Err(e) => {
                            let frame_err: FrameError = e.into();
                            if frame_err.is_fatal() {
                                events.status(format!("sync disabled: {}", frame_err));
                            }
                            Err(frame_err)
                        }
                    }
                }
            },
        )
    };

    shutdown.cancelled().await;
    info!("Stopping subsystems");

    // 1. No new frames.
    display_token.cancel();
    let _ = display_task.await;

    // 2. Cache: stop the timer, cancel in-flight downloads, bounded
    //    settle for store writes.
    cache_token.cancel();
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, cache_task).await;
    cache_engine.shutdown().await;

    // 3. Sync: the token doubles as the provider-call cancellation.
    sync_token.cancel();
    let _ = sync_task.await;

    let _ = bridge.await;

    // 4. Flush and close the store.
    store.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Spawn a periodic task. The first tick fires immediately; later ticks
/// keep the configured cadence. Errors are logged, never fatal to the
/// loop: a failing scan or tick retries on the next period.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    mut body: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), FrameError>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(task = name, "Periodic task stopped");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = body().await {
                        if matches!(e, FrameError::Cancelled) {
                            break;
                        }
                        error!(task = name, error = %e, "Periodic task iteration failed");
                    }
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
}

/// Bridge the event bus to the front-end text channel: frame and status
/// events go out as JSON lines on stdout, `IMAGE_LOADED` acks come back
/// on stdin.
fn spawn_front_end_bridge(events: EventBus, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let mut rx = events.subscribe();
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        let mut stdin_open = true;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Ok(event @ (CoreEvent::Frame(_) | CoreEvent::Status { .. })) => {
                        if let Ok(mut line) = serde_json::to_vec(&event) {
                            line.push(b'\n');
                            if stdout.write_all(&line).await.is_err() {
                                break;
                            }
                            let _ = stdout.flush().await;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Front-end bridge lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                },
                line = stdin.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => handle_inbound(&line),
                    Ok(None) => {
                        // stdin closed; keep emitting frames regardless.
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "Front-end channel read failed");
                        stdin_open = false;
                    }
                },
            }
        }
    })
}

fn handle_inbound(line: &str) {
    match serde_json::from_str::<InboundMessage>(line) {
        Ok(message) if message.kind == "IMAGE_LOADED" => {
            let ack = FrontEndAck {
                photo_id: message.id.unwrap_or_default(),
            };
            debug!(photo_id = %ack.photo_id, "Front-end acknowledged frame");
        }
        Ok(message) => debug!(kind = %message.kind, "Ignoring unknown front-end message"),
        Err(e) => warn!(error = %e, "Unparseable front-end message"),
    }
}
