//! Scripted prompter and mock driver/dialer used by unit tests.

use crate::error::{HopError, HopResult};
use crate::models::{ConnectionSpec, PoolStats, ResultSet, TunnelSpec};
use crate::services::connection::{Driver, Querier};
use crate::services::prompt::SecretPrompter;
use crate::services::tunnel::{RemoteTarget, Tunnel, TunnelDialer};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Answers questions from a fixed script, one answer per question.
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(String, Vec<(String, bool)>)>>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_label(&self) -> String {
        self.calls.lock().last().map(|(label, _)| label.clone()).unwrap_or_default()
    }

    pub fn last_questions(&self) -> Vec<(String, bool)> {
        self.calls.lock().last().map(|(_, q)| q.clone()).unwrap_or_default()
    }
}

impl SecretPrompter for ScriptedPrompter {
    fn prompt(
        &self,
        label: &str,
        _instruction: &str,
        questions: &[&str],
        echos: &[bool],
    ) -> HopResult<Vec<String>> {
        let asked = questions
            .iter()
            .zip(echos)
            .map(|(q, e)| (q.to_string(), *e))
            .collect();
        self.calls.lock().push((label.to_string(), asked));

        let mut answers = self.answers.lock();
        questions
            .iter()
            .map(|q| {
                answers
                    .pop_front()
                    .ok_or_else(|| HopError::internal(format!("no scripted answer for '{q}'")))
            })
            .collect()
    }
}

/// Shared counters observed by tests.
#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub pings: AtomicUsize,
    pub fetches: AtomicUsize,
    pub closes: AtomicUsize,
}

/// In-memory [`Querier`] replaying queued result sets.
///
/// The last queued result set is repeated once the queue runs down to it.
pub struct MockQuerier {
    results: Mutex<VecDeque<ResultSet>>,
    last_sql: Mutex<Option<String>>,
    last_params: Mutex<Vec<String>>,
    counters: Arc<Counters>,
    fail_ping: bool,
    fail_close: bool,
    closed: AtomicBool,
}

impl MockQuerier {
    pub fn new() -> Self {
        Self::with_counters(Arc::new(Counters::default()))
    }

    fn with_counters(counters: Arc<Counters>) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            last_sql: Mutex::new(None),
            last_params: Mutex::new(Vec::new()),
            counters,
            fail_ping: false,
            fail_close: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_result(self, set: ResultSet) -> Self {
        self.results.lock().push_back(set);
        self
    }

    pub fn last_sql(&self) -> Option<String> {
        self.last_sql.lock().clone()
    }

    pub fn last_params(&self) -> Vec<String> {
        self.last_params.lock().clone()
    }
}

#[async_trait]
impl Querier for MockQuerier {
    async fn ping(&self) -> HopResult<()> {
        self.counters.pings.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping {
            return Err(HopError::connection("connection refused"));
        }
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[&str]) -> HopResult<ResultSet> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_sql.lock() = Some(sql.to_string());
        *self.last_params.lock() = params.iter().map(|p| p.to_string()).collect();

        let mut results = self.results.lock();
        let set = if results.len() > 1 { results.pop_front() } else { results.front().cloned() };
        Ok(set.unwrap_or_else(ResultSet::no_columns))
    }

    fn stats(&self) -> PoolStats {
        PoolStats { max_size: 4, size: 1, available: 1, waiting: 0 }
    }

    fn close(&self) -> HopResult<()> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close {
            return Err(HopError::connection("close failed"));
        }
        Ok(())
    }
}

/// Driver handing out [`MockQuerier`]s.
#[derive(Clone)]
pub struct MockDriver {
    name: &'static str,
    pub counters: Arc<Counters>,
    fail_ping: bool,
    fail_close: bool,
    result: Option<ResultSet>,
    last_open: Arc<Mutex<Option<(ConnectionSpec, String)>>>,
}

impl MockDriver {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            counters: Arc::new(Counters::default()),
            fail_ping: false,
            fail_close: false,
            result: None,
            last_open: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing_ping(mut self) -> Self {
        self.fail_ping = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn with_result(mut self, set: ResultSet) -> Self {
        self.result = Some(set);
        self
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.counters.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Spec and password of the most recent open.
    pub fn last_open(&self) -> Option<(ConnectionSpec, String)> {
        self.last_open.lock().clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn open(&self, spec: &ConnectionSpec, password: &str) -> HopResult<Box<dyn Querier>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_open.lock() = Some((spec.clone(), password.to_string()));

        let mut querier = MockQuerier::with_counters(self.counters.clone());
        querier.fail_ping = self.fail_ping;
        querier.fail_close = self.fail_close;
        if let Some(set) = &self.result {
            querier = querier.with_result(set.clone());
        }
        Ok(Box::new(querier))
    }
}

#[derive(Default)]
struct DialerState {
    dials: AtomicUsize,
    closed: AtomicUsize,
    fail: bool,
    failing_close: Vec<String>,
    remotes: Mutex<Vec<RemoteTarget>>,
}

/// Dialer producing fake tunnels on distinct loopback ports.
#[derive(Clone, Default)]
pub struct MockDialer {
    state: Arc<DialerState>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { state: Arc::new(DialerState { fail: true, ..Default::default() }) }
    }

    /// Tunnels with this name fail to close.
    pub fn with_failing_close(self, name: &str) -> Self {
        let mut failing_close = self.state.failing_close.clone();
        failing_close.push(name.to_string());
        Self { state: Arc::new(DialerState { failing_close, fail: self.state.fail, ..Default::default() }) }
    }

    pub fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Remote targets passed to each dial, in order.
    pub fn remotes(&self) -> Vec<RemoteTarget> {
        self.state.remotes.lock().clone()
    }
}

#[async_trait]
impl TunnelDialer for MockDialer {
    async fn dial(
        &self,
        spec: &TunnelSpec,
        remote: &RemoteTarget,
        _prompter: &dyn SecretPrompter,
    ) -> HopResult<Box<dyn Tunnel>> {
        let n = self.state.dials.fetch_add(1, Ordering::SeqCst);
        self.state.remotes.lock().push(remote.clone());
        if self.state.fail {
            return Err(HopError::ssh(format!("failed to connect to {}", spec.address())));
        }

        Ok(Box::new(MockTunnel {
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 40_000 + n as u16)),
            fail_close: self.state.failing_close.contains(&spec.name),
            state: self.state.clone(),
        }))
    }
}

struct MockTunnel {
    addr: SocketAddr,
    fail_close: bool,
    state: Arc<DialerState>,
}

#[async_trait]
impl Tunnel for MockTunnel {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn close(&self) -> HopResult<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(HopError::ssh("disconnect failed"));
        }
        Ok(())
    }
}
