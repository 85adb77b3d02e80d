//! Counters and latency timers.
//!
//! The proxy talks to a [`MetricsSink`]; where the numbers go is the
//! sink's business. [`StatsdSink`] sends StatsD lines over UDP,
//! [`Recorder`] keeps them in memory for the admin health endpoint and
//! tests, and [`Tee`] fans out to several sinks.
//!
//! Names are `<scope>.<name>` where the scope is `http.in` for inbound
//! requests, `http.pri` for the primary backend and `http.alt` for the
//! shadow backend.

use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Inbound,
    Primary,
    Shadow,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "http.in",
            Self::Primary => "http.pri",
            Self::Shadow => "http.alt",
        }
    }
}

pub trait MetricsSink: Send + Sync {
    fn increment(&self, scope: Scope, name: &str);
    fn timing(&self, scope: Scope, name: &str, elapsed: Duration);
}

/// Fire-and-forget StatsD client. Send failures are dropped; metrics must
/// never hold up a request.
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    pub fn connect(address: &str, prefix: &str) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(address)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            prefix: prefix.trim_end_matches('.').to_string(),
        })
    }

    fn send(&self, line: &str) {
        if let Err(e) = self.socket.send(line.as_bytes()) {
            tracing::trace!(error = %e, "statsd send failed");
        }
    }
}

#[must_use]
pub fn counter_line(prefix: &str, scope: Scope, name: &str) -> String {
    format!("{}:1|c", metric_name(prefix, scope, name))
}

#[must_use]
pub fn timing_line(prefix: &str, scope: Scope, name: &str, elapsed: Duration) -> String {
    format!(
        "{}:{}|ms",
        metric_name(prefix, scope, name),
        elapsed.as_millis()
    )
}

fn metric_name(prefix: &str, scope: Scope, name: &str) -> String {
    if prefix.is_empty() {
        format!("{}.{name}", scope.as_str())
    } else {
        format!("{prefix}.{}.{name}", scope.as_str())
    }
}

impl MetricsSink for StatsdSink {
    fn increment(&self, scope: Scope, name: &str) {
        self.send(&counter_line(&self.prefix, scope, name));
    }

    fn timing(&self, scope: Scope, name: &str, elapsed: Duration) {
        self.send(&timing_line(&self.prefix, scope, name, elapsed));
    }
}

#[derive(Debug, Default)]
struct Tally {
    counters: BTreeMap<String, u64>,
    timings: BTreeMap<String, (u64, Duration)>,
}

/// In-memory counters and latency sample counts.
#[derive(Debug, Default)]
pub struct Recorder {
    tally: Mutex<Tally>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Tally) -> T) -> T {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tally)
    }

    #[must_use]
    pub fn count(&self, scope: Scope, name: &str) -> u64 {
        let key = metric_name("", scope, name);
        self.with(|t| t.counters.get(&key).copied().unwrap_or(0))
    }

    /// Number of latency samples recorded under this name.
    #[must_use]
    pub fn timings(&self, scope: Scope, name: &str) -> u64 {
        let key = metric_name("", scope, name);
        self.with(|t| t.timings.get(&key).map_or(0, |(n, _)| *n))
    }

    /// Counters plus `<name>.count` / `<name>.total_ms` per timer.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.with(|t| {
            let mut out = t.counters.clone();
            for (key, (n, total)) in &t.timings {
                out.insert(format!("{key}.count"), *n);
                out.insert(
                    format!("{key}.total_ms"),
                    u64::try_from(total.as_millis()).unwrap_or(u64::MAX),
                );
            }
            out
        })
    }
}

impl MetricsSink for Recorder {
    fn increment(&self, scope: Scope, name: &str) {
        let key = metric_name("", scope, name);
        self.with(|t| *t.counters.entry(key).or_default() += 1);
    }

    fn timing(&self, scope: Scope, name: &str, elapsed: Duration) {
        let key = metric_name("", scope, name);
        self.with(|t| {
            let entry = t.timings.entry(key).or_default();
            entry.0 += 1;
            entry.1 += elapsed;
        });
    }
}

pub struct Tee {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl Tee {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }
}

impl MetricsSink for Tee {
    fn increment(&self, scope: Scope, name: &str) {
        for sink in &self.sinks {
            sink.increment(scope, name);
        }
    }

    fn timing(&self, scope: Scope, name: &str, elapsed: Duration) {
        for sink in &self.sinks {
            sink.timing(scope, name, elapsed);
        }
    }
}
