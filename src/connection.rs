//! Per-exchange connection runner
//!
//! One task per exchange: receives frames, stamps receipt time at the
//! transport boundary, routes through the adapter, and publishes canonical
//! events. Bootstrap snapshots are fetched on spawned tasks feeding a
//! channel back into the select loop, so no pair ever blocks another.
//! Runs indefinitely with exponential-backoff reconnection.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{FeedError, Result};
use crate::events::Pair;
use crate::exchange::ExchangeAdapter;
use crate::sink::EventSink;
use crate::websocket::WebSocketClient;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;
/// Stale-connection receive timeout
const RECV_TIMEOUT: Duration = Duration::from_secs(45);
/// Bootstrap fetch attempts before the pair is reset and re-triggered
const SNAPSHOT_RETRY_ATTEMPTS: u64 = 3;

type SnapshotResult = (Pair, Result<String>);

/// Owns one exchange connection: adapter, transport, and bootstrap fetches
pub struct Connection {
    adapter: Box<dyn ExchangeAdapter>,
    client: WebSocketClient,
    sink: Arc<EventSink>,
    http: reqwest::Client,
    config: Arc<Config>,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl Connection {
    pub fn new(adapter: Box<dyn ExchangeAdapter>, sink: Arc<EventSink>, config: Arc<Config>) -> Self {
        let client = WebSocketClient::new(adapter.ws_endpoint());
        Self {
            adapter,
            client,
            sink,
            http: reqwest::Client::new(),
            config,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    /// Run indefinitely with automatic reconnection
    pub async fn run(&mut self) {
        info!(exchange = self.adapter.id(), "Starting connection");

        loop {
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!("Connection completed normally, reconnecting...");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(exchange = self.adapter.id(), error = %e, "Connection error");
                    self.reconnect_attempts += 1;

                    let base_delay = self.config.reconnect_delay_ms
                        * 2u64.pow(self.reconnect_attempts.min(6));
                    let delay = Duration::from_millis(base_delay.min(MAX_BACKOFF_MS));

                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_secs = delay.as_secs(),
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn connect_and_process(&mut self) -> Result<()> {
        // books are purely in-memory and rebuilt from scratch per connection
        self.adapter.reset();
        self.client.connect().await?;

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;

        for payload in self.adapter.subscribe_payloads() {
            self.client.send_text(payload).await?;
        }

        // Dropping the receiver on disconnect cancels delivery of any
        // in-flight bootstrap fetches for this connection's pairs.
        let (snap_tx, mut snap_rx) = mpsc::channel::<SnapshotResult>(32);

        let adapter = &mut self.adapter;
        let client = &mut self.client;
        let sink = &self.sink;

        loop {
            tokio::select! {
                frame = timeout(RECV_TIMEOUT, client.recv()) => match frame {
                    Ok(Ok(Some(text))) => {
                        let receipt_ts = now_millis();
                        match adapter.route(&text, receipt_ts) {
                            Ok(routed) => {
                                for event in &routed.events {
                                    sink.publish(event).await?;
                                }
                                for pair in routed.snapshot_requests {
                                    match adapter.snapshot_url(&pair) {
                                        Some(url) => spawn_snapshot_fetch(
                                            self.http.clone(),
                                            url,
                                            pair,
                                            snap_tx.clone(),
                                        ),
                                        None => warn!(pair = %pair, "No snapshot source for pair"),
                                    }
                                }
                            }
                            Err(FeedError::SequenceGap { pair, expected, got }) => {
                                warn!(
                                    exchange = adapter.id(),
                                    pair = %pair, expected, got,
                                    "Sequence gap, resubscribing pair"
                                );
                                resubscribe(adapter, client, &pair).await?;
                            }
                            Err(e) => {
                                warn!(exchange = adapter.id(), error = %e, "Dropping message");
                            }
                        }
                    }
                    Ok(Ok(None)) => continue,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        warn!("No message received within timeout, sending keepalive");
                        client.ping().await?;
                    }
                },
                Some((pair, result)) = snap_rx.recv() => {
                    let receipt_ts = now_millis();
                    match result {
                        Ok(body) => match adapter.apply_snapshot_body(&pair, &body, receipt_ts) {
                            Ok(events) => {
                                for event in &events {
                                    sink.publish(event).await?;
                                }
                            }
                            Err(FeedError::SequenceGap { pair, expected, got }) => {
                                warn!(
                                    pair = %pair, expected, got,
                                    "Gap while replaying bootstrap buffer, resubscribing pair"
                                );
                                resubscribe(adapter, client, &pair).await?;
                            }
                            Err(e) => {
                                // next incremental re-triggers the bootstrap
                                warn!(pair = %pair, error = %e, "Bad snapshot body, resetting pair");
                                adapter.reset_pair(&pair);
                            }
                        },
                        Err(e) => {
                            warn!(pair = %pair, error = %e, "Snapshot fetch failed, resetting pair");
                            adapter.reset_pair(&pair);
                        }
                    }
                },
            }
        }
    }
}

async fn resubscribe(
    adapter: &mut Box<dyn ExchangeAdapter>,
    client: &mut WebSocketClient,
    pair: &Pair,
) -> Result<()> {
    adapter.reset_pair(pair);
    for payload in adapter.pair_subscribe_payloads(pair) {
        client.send_text(payload).await?;
    }
    Ok(())
}

fn spawn_snapshot_fetch(
    http: reqwest::Client,
    url: String,
    pair: Pair,
    tx: mpsc::Sender<SnapshotResult>,
) {
    tokio::spawn(async move {
        let mut outcome: Result<String> = Err(FeedError::SnapshotFetch {
            pair: pair.clone(),
            reason: "no attempts made".to_string(),
        });
        for attempt in 1..=SNAPSHOT_RETRY_ATTEMPTS {
            match fetch_body(&http, &url).await {
                Ok(body) => {
                    outcome = Ok(body);
                    break;
                }
                Err(e) => {
                    warn!(pair = %pair, attempt, error = %e, "Snapshot fetch attempt failed");
                    outcome = Err(FeedError::SnapshotFetch {
                        pair: pair.clone(),
                        reason: e.to_string(),
                    });
                    sleep(Duration::from_millis(500 * attempt)).await;
                }
            }
        }
        // send fails only if the connection dropped, cancelling the bootstrap
        let _ = tx.send((pair, outcome)).await;
    });
}

async fn fetch_body(http: &reqwest::Client, url: &str) -> reqwest::Result<String> {
    http.get(url).send().await?.error_for_status()?.text().await
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
