//! In-process [`AnalysisClient`] for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geo_core::{AnalysisClient, AnalysisError, Expr, Image, Result, TileUrl};
use serde_json::Value;
use tracing::subscriber::DefaultGuard;

type Responder = Box<dyn Fn(&Expr) -> Result<Value> + Send + Sync>;
type TileResponder = Box<dyn Fn(&Image) -> Result<TileUrl> + Send + Sync>;

/// Counts calls and answers from closures.
pub(crate) struct MockClient {
    responder: Responder,
    tiles: Option<TileResponder>,
    auth_failures: AtomicUsize,
    auth_delay: Duration,
    compute_delay: Duration,
    auth_calls: AtomicUsize,
    compute_calls: AtomicUsize,
    map_calls: AtomicUsize,
}

impl std::fmt::Debug for MockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClient")
            .field("auth_calls", &self.auth_calls())
            .field("compute_calls", &self.compute_calls())
            .field("map_calls", &self.map_calls())
            .finish()
    }
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self {
            responder: Box::new(|_| Ok(Value::Null)),
            tiles: None,
            auth_failures: AtomicUsize::new(0),
            auth_delay: Duration::ZERO,
            compute_delay: Duration::ZERO,
            auth_calls: AtomicUsize::new(0),
            compute_calls: AtomicUsize::new(0),
            map_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_responder(
        mut self,
        responder: impl Fn(&Expr) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Box::new(responder);
        self
    }

    pub(crate) fn with_tiles(
        mut self,
        tiles: impl Fn(&Image) -> Result<TileUrl> + Send + Sync + 'static,
    ) -> Self {
        self.tiles = Some(Box::new(tiles));
        self
    }

    pub(crate) fn with_auth_failures(self, n: usize) -> Self {
        self.auth_failures.store(n, Ordering::SeqCst);
        self
    }

    pub(crate) const fn with_auth_delay(mut self, delay: Duration) -> Self {
        self.auth_delay = delay;
        self
    }

    pub(crate) const fn with_compute_delay(mut self, delay: Duration) -> Self {
        self.compute_delay = delay;
        self
    }

    pub(crate) fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn compute_calls(&self) -> usize {
        self.compute_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn map_calls(&self) -> usize {
        self.map_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn remote_calls(&self) -> usize {
        self.compute_calls() + self.map_calls()
    }
}

#[async_trait]
impl AnalysisClient for MockClient {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn authenticate(&self) -> Result<()> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if !self.auth_delay.is_zero() {
            tokio::time::sleep(self.auth_delay).await;
        }
        let failing = self
            .auth_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AnalysisError::AuthenticationFailed("invalid_grant".into()));
        }
        Ok(())
    }

    async fn compute(&self, expr: &Expr) -> Result<Value> {
        self.compute_calls.fetch_add(1, Ordering::SeqCst);
        if !self.compute_delay.is_zero() {
            tokio::time::sleep(self.compute_delay).await;
        }
        (self.responder)(expr)
    }

    async fn map_tiles(&self, image: &Image) -> Result<TileUrl> {
        let n = self.map_calls.fetch_add(1, Ordering::SeqCst);
        match &self.tiles {
            Some(tiles) => tiles(image),
            None => Ok(TileUrl::new(format!(
                "https://tiles.test/maps/{n}/tiles/{{z}}/{{x}}/{{y}}"
            ))),
        }
    }
}

/// Whether any string constant in `expr` equals `needle`.
pub(crate) fn mentions(expr: &Expr, needle: &str) -> bool {
    match expr {
        Expr::Constant(Value::String(s)) => s == needle,
        Expr::Constant(_) | Expr::Argument(_) => false,
        Expr::Array(items) => items.iter().any(|e| mentions(e, needle)),
        Expr::Dictionary(map) => map.values().any(|e| mentions(e, needle)),
        Expr::Invocation { args, .. } => args.values().any(|e| mentions(e, needle)),
        Expr::Function { body, .. } => mentions(body, needle),
    }
}

/// The first `Date` constant in `expr`, e.g. `"2021-01-09"`.
pub(crate) fn date_constant(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Invocation { function, args } if function == "Date" => match args.get("value") {
            Some(Expr::Constant(Value::String(s))) => Some(s.clone()),
            _ => None,
        },
        Expr::Invocation { args, .. } => args.values().find_map(date_constant),
        Expr::Array(items) => items.iter().find_map(date_constant),
        Expr::Dictionary(map) => map.values().find_map(date_constant),
        Expr::Function { body, .. } => date_constant(body),
        Expr::Constant(_) | Expr::Argument(_) => None,
    }
}

/// Log output of the current thread, captured while the guard is alive.
#[derive(Clone, Debug, Default)]
pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Routes warnings and errors of this thread into the returned buffer.
    pub(crate) fn install() -> (Self, DefaultGuard) {
        let logs = Self::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    /// Captured lines at `level` (e.g. `"WARN"`).
    pub(crate) fn lines(&self, level: &str) -> Vec<String> {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|line| line.contains(level))
            .map(String::from)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut out) = self.0.lock() {
            out.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
