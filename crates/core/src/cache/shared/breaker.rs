use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info};

use crate::cache::expires_after;
use crate::types::{CacheError, Result};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    /// 关闭状态，正常工作
    #[default]
    Closed,
    /// 半开状态，尝试恢复
    HalfOpen,
    /// 打开状态，拒绝请求
    Open,
}

impl CircuitBreakerState {
    pub fn is_closed(&self) -> bool {
        matches!(self, CircuitBreakerState::Closed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerState::Open)
    }
}

/// 熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// 失败阈值（连续失败次数）
    pub failure_threshold: u64,
    /// 成功阈值（半开状态下的成功次数）
    pub success_threshold: u64,
    /// 打开后等待多久进入半开（毫秒）
    pub open_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 30000,
        }
    }
}

struct BreakerInner {
    state: CircuitBreakerState,
    consecutive_failures: u64,
    consecutive_successes: u64,
    next_attempt_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Clears the half-open probe slot when the probe finishes or is dropped.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.breaker.inner.lock().probe_in_flight = false;
    }
}

/// 单个分片的熔断器
///
/// An open breaker fails calls immediately with [`CacheError::Backend`], so
/// a dead shard costs its keys nothing more than a lookup in this struct.
pub struct CircuitBreaker {
    shard: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    rejected: AtomicU64,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("shard", &self.shard)
            .field("state", &self.inner.lock().state)
            .field("rejected", &self.rejected.load(Ordering::Relaxed))
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(shard: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            shard: shard.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                next_attempt_at: None,
                probe_in_flight: false,
            }),
            rejected: AtomicU64::new(0),
        }
    }

    /// 执行操作，如果熔断器打开则直接返回错误
    ///
    /// While half-open only one caller at a time reaches the shard; the rest
    /// are rejected until that probe completes.
    pub async fn execute<F, T>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _probe = match self.allow_request() {
            Some(true) => Some(ProbeGuard { breaker: self }),
            Some(false) => None,
            None => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::Backend(format!(
                    "circuit breaker open for shard '{}'",
                    self.shard
                )));
            }
        };

        match operation.await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    /// `None` rejects the call; `Some(true)` admits it as the half-open probe.
    fn allow_request(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        let next_attempt_at = inner.next_attempt_at;
        match state {
            CircuitBreakerState::Closed => Some(false),
            CircuitBreakerState::HalfOpen if inner.probe_in_flight => None,
            CircuitBreakerState::HalfOpen => {
                inner.probe_in_flight = true;
                Some(true)
            }
            CircuitBreakerState::Open => match next_attempt_at {
                Some(next) if Instant::now() >= next => {
                    inner.state = CircuitBreakerState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = true;
                    info!("Circuit breaker for shard '{}' half-open", self.shard);
                    Some(true)
                }
                _ => None,
            },
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.consecutive_successes += 1;

        if inner.state == CircuitBreakerState::HalfOpen
            && inner.consecutive_successes >= self.config.success_threshold
        {
            inner.state = CircuitBreakerState::Closed;
            inner.next_attempt_at = None;
            info!("Circuit breaker for shard '{}' closed, shard recovered", self.shard);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_successes = 0;
        inner.consecutive_failures += 1;

        let failures = inner.consecutive_failures;
        let should_open = match inner.state {
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Closed => failures >= self.config.failure_threshold,
            CircuitBreakerState::Open => false,
        };

        if should_open {
            let next_attempt = expires_after(Duration::from_millis(self.config.open_timeout_ms));
            inner.state = CircuitBreakerState::Open;
            inner.next_attempt_at = Some(next_attempt);
            error!(
                "Circuit breaker for shard '{}' opened after {} consecutive failures",
                self.shard, inner.consecutive_failures
            );
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.inner.lock().state
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// 手动重置熔断器
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.next_attempt_at = None;
        inner.probe_in_flight = false;
    }
}
