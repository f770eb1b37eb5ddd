//! Health checker (C7, §4.7): two cooperating timers — a send timer that
//! fires a `PING` every `health_check_interval`, and a deadline timer, reset
//! by any reply (not just the PING's own), that fires `pong_timeout` if
//! nothing arrives within twice that interval. An interval of zero disables
//! both, per §4.7's "zero means no health checks".
//!
//! Grounded in `boost::redis::connection_base`'s `health_checker` (see
//! `include/boost/redis/connection_base.hpp` and
//! `test/test_conn_check_health.cpp`), adapted to two `tokio::time::Sleep`s
//! the run loop's `select!` polls directly rather than the original's
//! `steady_timer` pair.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant, Sleep};

use crate::redis_conn::resp3::request::{Request, RequestConfig};

/// Which timer fired, returned by `HealthChecker::wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    SendDue,
    PongTimedOut,
}

pub struct HealthChecker {
    interval: Duration,
    health_check_id: String,
    send_timer: Option<Pin<Box<Sleep>>>,
    pong_deadline: Option<Pin<Box<Sleep>>>,
}

impl HealthChecker {
    pub fn new(interval: Duration, health_check_id: String) -> Self {
        let send_timer = if interval.is_zero() { None } else { Some(Box::pin(sleep(interval))) };
        HealthChecker { interval, health_check_id, send_timer, pong_deadline: None }
    }

    pub fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Resolves once either timer fires. Never resolves if disabled; a
    /// caller gates this with `if health.enabled()` in a `select!` arm the
    /// same way it would a single timer. Polls both fields directly (rather
    /// than delegating to two separate `&mut self` methods) so the borrow
    /// checker sees them as disjoint.
    pub async fn wait(&mut self) -> HealthEvent {
        let send = async {
            match &mut self.send_timer {
                Some(s) => s.as_mut().await,
                None => std::future::pending().await,
            }
        };
        let timeout = async {
            match &mut self.pong_deadline {
                Some(p) => p.as_mut().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = timeout => HealthEvent::PongTimedOut,
            _ = send => HealthEvent::SendDue,
        }
    }

    /// Re-arms the send timer for the next period and starts (or extends)
    /// the pong deadline. Called right after a `PING` is staged for write.
    pub fn mark_sent(&mut self) {
        if let Some(s) = &mut self.send_timer {
            s.as_mut().reset(Instant::now() + self.interval);
        }
        let deadline = Instant::now() + self.interval * 2;
        match &mut self.pong_deadline {
            Some(p) => p.as_mut().reset(deadline),
            None => self.pong_deadline = Some(Box::pin(sleep_until(deadline))),
        }
    }

    /// Pushes the pong deadline back out, called whenever any reply is
    /// routed to a request slot — liveness evidence isn't limited to the
    /// health check's own `PING`/`PONG` pair (§4.7).
    pub fn reset_deadline(&mut self) {
        if !self.enabled() {
            return;
        }
        if let Some(p) = &mut self.pong_deadline {
            p.as_mut().reset(Instant::now() + self.interval * 2);
        }
    }

    /// Called on reconnect: drops any deadline armed against the old
    /// connection so a stale timeout can't fire against the new one.
    pub fn on_connection_lost(&mut self) {
        self.pong_deadline = None;
        if let Some(s) = &mut self.send_timer {
            s.as_mut().reset(Instant::now() + self.interval);
        }
    }

    /// `cancel(health_check)` (§4.10): stops both timers for the remainder of
    /// this connection's lifetime.
    pub fn disable(&mut self) {
        self.interval = Duration::ZERO;
        self.send_timer = None;
        self.pong_deadline = None;
    }

    pub fn build_ping(&self) -> Request {
        let mut req = Request::with_config(RequestConfig {
            hello_with_priority: false,
            cancel_on_connection_lost: true,
            cancel_if_unresponded: true,
            ..Default::default()
        });
        req.push(&[&"PING", &self.health_check_id]);
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_disables() {
        let hc = HealthChecker::new(Duration::ZERO, "redis-conn".to_string());
        assert!(!hc.enabled());
    }

    #[test]
    fn ping_carries_health_check_id() {
        let hc = HealthChecker::new(Duration::from_secs(2), "my-id".to_string());
        let req = hc.build_ping();
        assert_eq!(req.expected_replies(), 1);
        let payload = String::from_utf8_lossy(req.payload());
        assert!(payload.contains("PING"));
        assert!(payload.contains("my-id"));
        assert!(!req.config.hello_with_priority);
    }
}
