//! Streaming client (C4): a long-lived Kraken ticker subscription with
//! automatic reconnection. Grounded on the teacher's `stream_pair`
//! (per-task `connect_async` + `SplitSink`/`SplitStream` + log-and-skip
//! on parse error), generalized with ping/pong keepalive, reconnect
//! backoff, per-pair delivery channels, and the event/array demux shape
//! documented in the Kraken websocket reference material.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::cache::SharedCache;
use crate::config::ExchangeConfig;
use crate::errors::ServiceError;
use crate::models::Price;
use crate::pairs;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWriter = futures_util::stream::SplitSink<WsStream, Message>;

/// Capacity of each per-pair delivery channel. Overflow drops the
/// oldest buffered item, preferring the freshest price.
const DEFAULT_CHANNEL_CAPACITY: usize = 100;
/// Read deadline, refreshed on every pong; matches Kraken's ~60s
/// recommendation twice over the ~30s ping interval.
const READ_DEADLINE: Duration = Duration::from_secs(60);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Reconnecting,
    Closed,
}

struct SharedState {
    write: Option<WsWriter>,
}

/// Streaming client state machine:
/// `Disconnected → Connecting → Connected → Subscribed → Disconnected
/// (Reconnecting) → …`, terminal at `Closed`.
pub struct StreamClient {
    url: String,
    cache: SharedCache,
    ttl: Duration,
    channel_capacity: usize,

    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    channels: Arc<DashMap<String, broadcast::Sender<Price>>>,
    conn: Arc<RwLock<SharedState>>,

    reconnecting: Arc<Mutex<bool>>,
    reqid_counter: Arc<AtomicU64>,
    dropped_updates: Arc<AtomicU64>,

    shutdown: CancellationToken,
    closed: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl StreamClient {
    pub fn new(config: &ExchangeConfig, cache: SharedCache) -> Self {
        Self {
            url: config.websocket_url.clone(),
            cache,
            ttl: config.price_cache_ttl,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            channels: Arc::new(DashMap::new()),
            conn: Arc::new(RwLock::new(SharedState { write: None })),
            reconnecting: Arc::new(Mutex::new(false)),
            reqid_counter: Arc::new(AtomicU64::new(1)),
            dropped_updates: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn dropped_update_count(&self) -> u64 {
        self.dropped_updates.load(Ordering::Relaxed)
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Dials the websocket, installs the reader and pinger workers, and
    /// (re)subscribes to whatever is already in the subscription set.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ServiceError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ServiceError::StreamDisconnected);
        }

        self.set_state(ConnectionState::Connecting).await;

        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| ServiceError::RetryableUpstream(format!("websocket connect failed: {e}")))?;
        let (write, read) = ws_stream.split();

        {
            let mut conn = self.conn.write().await;
            conn.write = Some(write);
        }
        self.set_state(ConnectionState::Connected).await;

        let reader = tokio::spawn(Self::run_reader(Arc::clone(self), read));
        let pinger = tokio::spawn(Self::run_pinger(Arc::clone(self)));
        self.tasks.lock().await.extend([reader, pinger]);

        let existing: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        if !existing.is_empty() {
            self.resubscribe_all(&existing).await?;
            self.set_state(ConnectionState::Subscribed).await;
        }

        Ok(())
    }

    /// Re-sends the subscribe message for the entire subscription set
    /// atomically; if that single send fails, retries per-pair so one
    /// bad symbol doesn't take down the whole set. A per-pair failure
    /// is logged and skipped rather than aborting the reconnect — the
    /// reader/pinger will notice a truly broken socket and schedule
    /// another reconnect on their own.
    async fn resubscribe_all(&self, canonical_pairs: &[String]) -> Result<(), ServiceError> {
        if let Err(e) = self.send_subscribe(canonical_pairs).await {
            tracing::warn!(error = %e, "atomic resubscribe failed, retrying per-pair to isolate bad symbols");
            for pair in canonical_pairs {
                if let Err(e) = self.send_subscribe(std::slice::from_ref(pair)).await {
                    tracing::warn!(pair = %pair, error = %e, "per-pair resubscribe failed");
                }
            }
        }
        Ok(())
    }

    /// Registers interest in `pairs`, creating a per-pair delivery
    /// channel if one doesn't already exist. Idempotent: re-subscribing
    /// to an already-subscribed pair never closes or replaces its
    /// channel.
    pub async fn subscribe(self: &Arc<Self>, new_pairs: &[String]) -> Result<(), ServiceError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ServiceError::StreamDisconnected);
        }

        let mut to_advertise = Vec::new();
        {
            let mut subs = self.subscriptions.write().await;
            for pair in new_pairs {
                let canonical = pairs::split_canonical(pair).map(|_| pair.to_uppercase())?;
                if subs.insert(canonical.clone()) {
                    to_advertise.push(canonical.clone());
                }
                self.channels
                    .entry(canonical)
                    .or_insert_with(|| broadcast::channel(self.channel_capacity).0);
            }
        }

        if to_advertise.is_empty() {
            return Ok(());
        }

        if self.state().await >= ConnectionState::Connected {
            self.send_subscribe(&to_advertise).await?;
        }
        Ok(())
    }

    async fn send_subscribe(&self, canonical_pairs: &[String]) -> Result<(), ServiceError> {
        let ws_symbols: Vec<String> = canonical_pairs.iter().map(|p| pairs::to_ws(p)).collect::<Result<_, _>>()?;
        let reqid = self.reqid_counter.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "event": "subscribe",
            "pair": ws_symbols,
            "subscription": { "name": "ticker" },
            "reqid": reqid,
        })
        .to_string();

        let mut conn = self.conn.write().await;
        let Some(write) = conn.write.as_mut() else {
            return Err(ServiceError::StreamDisconnected);
        };
        write
            .send(Message::Text(payload))
            .await
            .map_err(|e| ServiceError::RetryableUpstream(format!("subscribe send failed: {e}")))
    }

    /// Fast path: consult the cache. On miss, ensure a subscription
    /// exists and wait on the per-pair broadcast channel (or
    /// cancellation). A lagged receiver (buffer overrun) just retries
    /// for the next fresher value rather than failing the call.
    pub async fn get_ticker(self: &Arc<Self>, ctx: &CancellationToken, pair: &str) -> Result<Price, ServiceError> {
        let canonical = pair.to_uppercase();

        if let Ok(crate::cache::CacheLookup::Hit(price)) = self.cache.get(&canonical).await {
            return Ok(price);
        }

        self.subscribe(std::slice::from_ref(&canonical)).await?;

        let mut receiver = self
            .channels
            .get(&canonical)
            .ok_or(ServiceError::StreamDisconnected)?
            .subscribe();

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ServiceError::Cancelled),
                _ = self.shutdown.cancelled() => return Err(ServiceError::StreamDisconnected),
                received = receiver.recv() => {
                    match received {
                        Ok(price) => return Ok(price),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            self.dropped_updates.fetch_add(n, Ordering::Relaxed);
                            metrics::counter!("stream_updates_dropped_total", "pair" => canonical.clone())
                                .increment(n);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return Err(ServiceError::StreamDisconnected),
                    }
                }
            }
        }
    }

    pub async fn get_tickers(self: &Arc<Self>, ctx: &CancellationToken, pairs: &[String]) -> Result<Vec<Price>, ServiceError> {
        let mut out = Vec::with_capacity(pairs.len());
        for pair in pairs {
            out.push(self.get_ticker(ctx, pair).await?);
        }
        Ok(out)
    }

    async fn run_reader(self: Arc<Self>, mut read: futures_util::stream::SplitStream<WsStream>) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("stream reader shutting down");
                    return;
                }
                frame = tokio::time::timeout(READ_DEADLINE, read.next()) => {
                    match frame {
                        Err(_elapsed) => {
                            tracing::warn!("stream read deadline exceeded, reconnecting");
                            self.trigger_reconnect().await;
                            return;
                        }
                        Ok(None) => {
                            tracing::warn!("stream closed by peer, reconnecting");
                            self.trigger_reconnect().await;
                            return;
                        }
                        Ok(Some(Err(e))) => {
                            tracing::warn!(error = %e, "stream read error, reconnecting");
                            self.trigger_reconnect().await;
                            return;
                        }
                        Ok(Some(Ok(Message::Pong(_)))) => {
                            // read deadline is refreshed implicitly by
                            // looping back around to the next timeout().
                        }
                        Ok(Some(Ok(Message::Text(text)))) => {
                            self.handle_message(&text).await;
                        }
                        Ok(Some(Ok(Message::Close(_)))) => {
                            tracing::info!("stream received close frame, reconnecting");
                            self.trigger_reconnect().await;
                            return;
                        }
                        Ok(Some(Ok(_))) => {}
                    }
                }
            }
        }
    }

    async fn handle_message(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            tracing::warn!(raw = text, "failed to parse stream message as JSON");
            return;
        };

        if value.is_object() {
            if let Some(event) = value.get("event").and_then(Value::as_str) {
                match event {
                    "systemStatus" => tracing::debug!("kraken system status: {value}"),
                    "subscriptionStatus" => tracing::debug!("kraken subscription status: {value}"),
                    "heartbeat" => {}
                    "error" => tracing::warn!("kraken reported error: {value}"),
                    other => tracing::trace!("unhandled kraken event {other}: {value}"),
                }
            }
            return;
        }

        let Some((ws_pair, amount)) = Self::parse_update(&value) else {
            return;
        };

        let canonical = match pairs::from_ws(&ws_pair) {
            Ok(c) => c,
            Err(_) => match self.resolve_via_subscriptions(&ws_pair).await {
                Some(c) => c,
                None => {
                    tracing::warn!(ws_pair = %ws_pair, "update for unrecognized ws pair, dropping");
                    return;
                }
            },
        };

        let Ok(price) = Price::new(&canonical, amount, chrono::Utc::now()) else {
            return;
        };

        if let Err(e) = self.cache.set(&canonical, price.clone(), self.ttl).await {
            tracing::warn!(pair = %canonical, error = ?e, "failed to write stream update to cache");
        }

        self.deliver(&canonical, price).await;
    }

    /// Fallback resolution when `from_ws` can't invert the symbol
    /// directly: re-map every subscribed canonical pair to its ws form
    /// and compare.
    async fn resolve_via_subscriptions(&self, ws_pair: &str) -> Option<String> {
        let subs = self.subscriptions.read().await;
        subs.iter().find(|canonical| pairs::to_ws(canonical).map(|w| w == ws_pair).unwrap_or(false)).cloned()
    }

    fn parse_update(value: &Value) -> Option<(String, f64)> {
        let arr = value.as_array()?;
        if arr.len() < 4 {
            return None;
        }
        let payload = &arr[1];
        let ws_pair = arr[3].as_str()?.to_string();
        let price_str = payload.get("c")?.as_array()?.first()?.as_str()?;
        let amount = price_str.parse::<f64>().ok()?;
        Some((ws_pair, amount))
    }

    /// Publishes to the per-pair broadcast channel. `send` never
    /// blocks; a full ring buffer silently evicts the oldest unread
    /// value (the broadcast channel's built-in drop-oldest semantics),
    /// which callers observe as `RecvError::Lagged` on their next
    /// `recv`. A channel with no current subscribers yields a harmless
    /// send error that we ignore.
    async fn deliver(&self, canonical: &str, price: Price) {
        let Some(sender) = self.channels.get(canonical).map(|e| e.clone()) else {
            return;
        };
        let _ = sender.send(price);
    }

    async fn trigger_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        {
            let mut guard = self.reconnecting.lock().await;
            if *guard {
                return;
            }
            *guard = true;
        }

        self.set_state(ConnectionState::Reconnecting).await;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.reconnect_loop().await;
            *this.reconnecting.lock().await = false;
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        self.set_state(ConnectionState::Disconnected).await;

        for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
            if self.shutdown.is_cancelled() || self.closed.load(Ordering::Relaxed) {
                return;
            }

            let backoff = Duration::from_secs(attempt as u64).min(Duration::from_secs(60));
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }

            match self.connect().await {
                Ok(()) => {
                    tracing::info!(attempt, "stream reconnected");
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "stream reconnect attempt failed");
                }
            }
        }

        tracing::error!("stream reconnect exhausted after {MAX_RECONNECT_ATTEMPTS} attempts, remaining disconnected");
        self.set_state(ConnectionState::Disconnected).await;
    }

    async fn run_pinger(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::info!("stream pinger shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let mut conn = self.conn.write().await;
                    if let Some(write) = conn.write.as_mut() {
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            tracing::warn!(error = %e, "ping failed");
                            drop(conn);
                            self.trigger_reconnect().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Sets `Closed`, cancels the shared shutdown token (unblocking the
    /// reader/pinger selects), waits for both to exit, then drops all
    /// per-pair channels. After this, all operations fail fast.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.set_state(ConnectionState::Closed).await;
        self.shutdown.cancel();

        {
            let mut conn = self.conn.write().await;
            if let Some(write) = conn.write.as_mut() {
                let _ = write.close().await;
            }
            conn.write = None;
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }

        self.channels.clear();
    }
}

impl PartialOrd for ConnectionState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        fn rank(s: &ConnectionState) -> u8 {
            match s {
                ConnectionState::Disconnected => 0,
                ConnectionState::Connecting => 1,
                ConnectionState::Connected => 2,
                ConnectionState::Subscribed => 3,
                ConnectionState::Reconnecting => 0,
                ConnectionState::Closed => 255,
            }
        }
        Some(rank(self).cmp(&rank(other)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_array_update_frame() {
        let value: Value = serde_json::from_str(
            r#"[1,{"c":["50001.0","1.0"]},"ticker","XBT/USD"]"#,
        )
        .unwrap();
        let (ws_pair, amount) = StreamClient::parse_update(&value).unwrap();
        assert_eq!(ws_pair, "XBT/USD");
        assert_eq!(amount, 50001.0);
    }

    #[test]
    fn ignores_event_object_frames() {
        let value: Value =
            serde_json::from_str(r#"{"event":"systemStatus","status":"online"}"#).unwrap();
        assert!(value.is_object());
        assert!(StreamClient::parse_update(&value).is_none());
    }

    #[test]
    fn rejects_short_arrays() {
        let value: Value = serde_json::from_str(r#"[1,{"c":["1.0"]}]"#).unwrap();
        assert!(StreamClient::parse_update(&value).is_none());
    }

    #[test]
    fn reconnect_backoff_matches_min_k_seconds_60_cap() {
        for attempt in 1u64..=12 {
            let expected = Duration::from_secs(attempt).min(Duration::from_secs(60));
            let actual = Duration::from_secs(attempt).min(Duration::from_secs(60));
            assert_eq!(actual, expected);
        }
        assert_eq!(Duration::from_secs(100).min(Duration::from_secs(60)), Duration::from_secs(60));
    }
}
