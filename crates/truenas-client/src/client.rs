//! Session management: authentication, keepalive, reconnection.
//!
//! A [`Client`] owns one transport at a time and moves through
//! `Idle -> Connecting -> Authenticated -> Closed`. Reconnecting after an
//! involuntary transport loss is the session's job, not the caller's:
//! a supervisor task watches the live connection and re-dials with
//! exponential backoff until the client is closed or the failure is
//! permanent.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::de::{DeserializeOwned, Error as _};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::rpc::RpcCore;
use crate::transport::Transport;

/// Session state. `Authenticated` carries the live RPC core.
enum State {
    Idle,
    Connecting,
    Authenticated(Arc<RpcCore>),
    Closed,
}

/// Authenticated JSON-RPC client for the TrueNAS middleware.
///
/// Cheap to share behind a reference; all methods take `&self`. Calls
/// issued while the session is not authenticated fail with
/// [`ClientError::NotConnected`]; once [`connected`](Self::connected)
/// reports `true`, a call either succeeds, surfaces an RPC error, or
/// surfaces a connection error. There is no silent loss.
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    config: ClientConfig,
    state: RwLock<State>,
    /// Serializes connect attempts so concurrent `connect` calls cannot
    /// dial twice.
    connect_gate: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Client {
    /// Creates a client. No connection is made until
    /// [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(State::Idle),
                connect_gate: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Dials the appliance and performs the API-key login handshake.
    ///
    /// Idempotent: calling `connect` on an already-authenticated client is
    /// a no-op and does not open a second connection. After
    /// [`close`](Self::close) it fails with [`ClientError::Closed`].
    pub async fn connect(&self) -> Result<()> {
        self.shared.config.validate()?;

        let _gate = self.shared.connect_gate.lock().await;
        match &*self.shared.state.read().unwrap() {
            State::Closed => return Err(ClientError::Closed),
            State::Authenticated(core) if !core.is_closed() => return Ok(()),
            _ => {}
        }

        *self.shared.state.write().unwrap() = State::Connecting;
        match Shared::establish(&self.shared).await {
            Ok(core) => {
                *self.shared.state.write().unwrap() = State::Authenticated(Arc::clone(&core));
                Shared::spawn_session_tasks(&self.shared, core);
                Ok(())
            }
            Err(e) => {
                let mut state = self.shared.state.write().unwrap();
                if !matches!(*state, State::Closed) {
                    *state = State::Idle;
                }
                Err(e)
            }
        }
    }

    /// Whether the session is currently authenticated.
    pub fn connected(&self) -> bool {
        match &*self.shared.state.read().unwrap() {
            State::Authenticated(core) => !core.is_closed(),
            _ => false,
        }
    }

    /// Closes the client. Idempotent; any subsequent `connect` fails with
    /// [`ClientError::Closed`].
    pub async fn close(&self) {
        let prev = {
            let mut state = self.shared.state.write().unwrap();
            std::mem::replace(&mut *state, State::Closed)
        };
        if let State::Authenticated(core) = prev {
            core.shutdown().await;
        }
        let tasks: Vec<_> = self.shared.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Issues a typed call with the configured per-call deadline.
    pub async fn call<P, T>(&self, method: &str, params: P) -> Result<T>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let raw = self.call_raw(method, to_params(params)?).await?;
        serde_json::from_value(raw).map_err(ClientError::Decode)
    }

    /// Issues a call, returning the raw `result` value.
    pub async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        let core = self.current_core()?;
        let timeout = self.shared.config.call_timeout;
        tokio::time::timeout(timeout, core.call(method, params))
            .await
            .map_err(|_| ClientError::Timeout(timeout))?
    }

    /// Sends a notification; no reply is awaited.
    pub async fn notify<P: Serialize>(&self, method: &str, params: P) -> Result<()> {
        let core = self.current_core()?;
        core.notify(method, to_params(params)?).await
    }

    /// Sends a `core.ping` and checks the `"pong"` reply.
    pub async fn ping(&self) -> Result<()> {
        let reply: String = self.call("core.ping", json!([])).await?;
        if reply != "pong" {
            return Err(ClientError::Decode(serde_json::Error::custom(format!(
                "unexpected ping reply {:?}",
                reply
            ))));
        }
        Ok(())
    }

    /// Number of in-flight calls on the current connection. Diagnostic;
    /// zero when not connected.
    pub fn pending_calls(&self) -> usize {
        match &*self.shared.state.read().unwrap() {
            State::Authenticated(core) => core.pending_calls(),
            _ => 0,
        }
    }

    fn current_core(&self) -> Result<Arc<RpcCore>> {
        match &*self.shared.state.read().unwrap() {
            State::Authenticated(core) if !core.is_closed() => Ok(Arc::clone(core)),
            State::Closed => Err(ClientError::Closed),
            _ => Err(ClientError::NotConnected),
        }
    }
}

impl Shared {
    /// Dials, starts the RPC core, and authenticates. On any failure the
    /// partially-built connection is torn down.
    async fn establish(shared: &Arc<Shared>) -> Result<Arc<RpcCore>> {
        let config = &shared.config;
        let transport =
            Transport::connect(&config.url, config.insecure_tls, config.connect_timeout).await?;
        let (sink, stream) = transport.split();
        let core = RpcCore::start(sink, stream);

        let auth = tokio::time::timeout(
            config.call_timeout,
            core.call("auth.login_with_api_key", json!([config.api_key])),
        )
        .await;

        let authenticated = match auth {
            Ok(Ok(Value::Bool(ok))) => ok,
            Ok(Ok(other)) => {
                core.shutdown().await;
                return Err(ClientError::Decode(serde_json::Error::custom(format!(
                    "unexpected login reply {}",
                    other
                ))));
            }
            Ok(Err(e)) => {
                core.shutdown().await;
                return Err(e);
            }
            Err(_) => {
                core.shutdown().await;
                return Err(ClientError::Timeout(config.call_timeout));
            }
        };

        if !authenticated {
            core.shutdown().await;
            return Err(ClientError::AuthFailed);
        }

        debug!(url = %config.url, "session authenticated");
        Ok(core)
    }

    /// Spawns the keepalive and reconnect supervisor for a fresh
    /// connection.
    fn spawn_session_tasks(shared: &Arc<Shared>, core: Arc<RpcCore>) {
        let mut tasks = shared.tasks.lock().unwrap();
        tasks.retain(|t| !t.is_finished());

        if shared.config.ping_interval > Duration::ZERO {
            tasks.push(tokio::spawn(Self::keepalive_loop(
                Arc::clone(shared),
                Arc::clone(&core),
            )));
        }
        tasks.push(tokio::spawn(Self::supervise(Arc::clone(shared), core)));
    }

    /// Periodic `core.ping`; a failed ping tears the connection down so
    /// the supervisor reconnects.
    async fn keepalive_loop(shared: Arc<Shared>, core: Arc<RpcCore>) {
        let interval = shared.config.ping_interval;
        loop {
            tokio::time::sleep(interval).await;
            if core.is_closed() {
                return;
            }
            let ping = tokio::time::timeout(
                shared.config.call_timeout,
                core.call("core.ping", json!([])),
            )
            .await;
            match ping {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "keepalive ping failed, dropping connection");
                    core.shutdown().await;
                    return;
                }
                Err(_) => {
                    warn!("keepalive ping timed out, dropping connection");
                    core.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Watches the live connection; on involuntary loss, falls back to
    /// `Idle` and re-dials with exponential backoff in
    /// `[reconnect_min, reconnect_max]`.
    async fn supervise(shared: Arc<Shared>, mut core: Arc<RpcCore>) {
        loop {
            core.wait_closed().await;

            {
                let mut state = shared.state.write().unwrap();
                if matches!(*state, State::Closed) {
                    return;
                }
                *state = State::Idle;
            }
            info!("session lost, reconnecting");

            let mut delay = shared.config.reconnect_min;
            loop {
                tokio::time::sleep(delay).await;

                let _gate = shared.connect_gate.lock().await;
                match &*shared.state.read().unwrap() {
                    State::Closed => return,
                    // A caller-issued connect beat us to it; supervise the
                    // connection it established instead of dialing again.
                    State::Authenticated(current) if !current.is_closed() => {
                        core = Arc::clone(current);
                        break;
                    }
                    _ => {}
                }
                *shared.state.write().unwrap() = State::Connecting;
                match Self::establish(&shared).await {
                    Ok(next) => {
                        let closed_during_connect = {
                            let mut state = shared.state.write().unwrap();
                            if matches!(*state, State::Closed) {
                                true
                            } else {
                                *state = State::Authenticated(Arc::clone(&next));
                                false
                            }
                        };
                        if closed_during_connect {
                            next.shutdown().await;
                            return;
                        }
                        info!("session re-established");
                        if shared.config.ping_interval > Duration::ZERO {
                            let handle = tokio::spawn(Self::keepalive_loop(
                                Arc::clone(&shared),
                                Arc::clone(&next),
                            ));
                            shared.tasks.lock().unwrap().push(handle);
                        }
                        core = next;
                        break;
                    }
                    Err(e) if e.is_auth_failed() || e.is_config_error() => {
                        let mut state = shared.state.write().unwrap();
                        if !matches!(*state, State::Closed) {
                            *state = State::Idle;
                        }
                        warn!(error = %e, "reconnect failed permanently, giving up");
                        return;
                    }
                    Err(e) => {
                        {
                            let mut state = shared.state.write().unwrap();
                            if matches!(*state, State::Closed) {
                                return;
                            }
                            *state = State::Idle;
                        }
                        debug!(error = %e, delay_ms = delay.as_millis() as u64, "reconnect attempt failed");
                        delay = next_backoff(delay, &shared.config);
                    }
                }
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

/// Wraps parameters into the positional-array convention the middleware
/// expects. Serializing to anything other than a JSON array is a bug in
/// the caller.
fn to_params<P: Serialize>(params: P) -> Result<Value> {
    let value = serde_json::to_value(params).map_err(ClientError::Decode)?;
    match value {
        Value::Array(_) => Ok(value),
        Value::Null => Ok(json!([])),
        other => Ok(json!([other])),
    }
}

fn next_backoff(current: Duration, config: &ClientConfig) -> Duration {
    let scaled = current.as_secs_f64() * config.reconnect_factor;
    Duration::from_secs_f64(scaled.min(config.reconnect_max.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        let config = ClientConfig {
            reconnect_min: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(8),
            reconnect_factor: 2.0,
            ..ClientConfig::new("ws://nas.local/websocket", "key")
        };
        let mut delay = config.reconnect_min;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(delay);
            delay = next_backoff(delay, &config);
        }
        assert_eq!(
            seen,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn test_to_params_shapes() {
        assert_eq!(to_params(json!(["a", 1])).unwrap(), json!(["a", 1]));
        assert_eq!(to_params(json!({"k": "v"})).unwrap(), json!([{"k": "v"}]));
        assert_eq!(to_params(Value::Null).unwrap(), json!([]));
    }
}
