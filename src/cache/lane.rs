//! Single-lane request queue for rate-limited upstream providers.
//!
//! Every clone of a `RequestLane` feeds the same worker task, so calls are
//! executed one at a time, at most once per `min_interval`, no matter how many
//! fusions are in flight. Rate-limited responses are retried with escalating
//! backoff; the backoff sleep happens outside the lane. A queued call whose
//! caller has gone away is dropped without running or using a slot.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{FuseError, Result};

trait LaneJob: Send {
    /// The submitter stopped waiting for the reply
    fn abandoned(&self) -> bool;

    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
}

struct PendingCall<T, F> {
    call: Arc<F>,
    reply: oneshot::Sender<Result<T>>,
}

impl<T, F, Fut> LaneJob for PendingCall<T, F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let PendingCall { call, reply } = *self;
        async move {
            let result = call().await;
            let _ = reply.send(result);
        }
        .boxed()
    }
}

type Job = Box<dyn LaneJob>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfig {
    /// Minimum spacing between call starts
    pub min_interval: Duration,
    /// Extra attempts after a rate-limited response
    pub max_retries: u32,
    /// First backoff delay; attempt n waits `n * backoff_base`
    pub backoff_base: Duration,
}

impl LaneConfig {
    pub fn per_minute(calls_per_minute: u32) -> Self {
        Self {
            min_interval: Duration::from_secs(60) / calls_per_minute.max(1),
            ..Self::default()
        }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2), // 30 calls/minute
            max_retries: 2,
            backoff_base: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct RequestLane {
    name: &'static str,
    config: LaneConfig,
    jobs: mpsc::UnboundedSender<Job>,
}

impl RequestLane {
    /// Start the lane worker. Must be called inside a tokio runtime.
    pub fn spawn(name: &'static str, config: LaneConfig) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();
        let min_interval = config.min_interval;

        tokio::spawn(async move {
            let mut last_start: Option<Instant> = None;
            while let Some(job) = queue.recv().await {
                if let Some(prev) = last_start {
                    let next = prev + min_interval;
                    if !job.abandoned() && Instant::now() < next {
                        tokio::time::sleep_until(next).await;
                    }
                }
                if job.abandoned() {
                    debug!(lane = name, "skipping call abandoned by its caller");
                    continue;
                }
                last_start = Some(Instant::now());
                job.run().await;
            }
            debug!(lane = name, "request lane closed");
        });

        Self { name, config, jobs }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> LaneConfig {
        self.config
    }

    /// Run `call` through the lane, retrying rate-limited failures.
    pub async fn submit<T, F, Fut>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let call = Arc::new(call);
        let mut attempt: u32 = 0;

        loop {
            let (reply, response) = oneshot::channel();
            let job: Job = Box::new(PendingCall {
                call: Arc::clone(&call),
                reply,
            });

            self.jobs
                .send(job)
                .map_err(|_| FuseError::Internal(format!("request lane {} closed", self.name)))?;

            let result = response.await.map_err(|_| {
                FuseError::Internal(format!("request lane {} dropped a job", self.name))
            })?;

            match result {
                Err(e) if e.is_rate_limited() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff_base * attempt;
                    warn!(
                        lane = self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn lane() -> RequestLane {
        RequestLane::spawn(
            "test",
            LaneConfig {
                min_interval: Duration::from_secs(2),
                max_retries: 2,
                backoff_base: Duration::from_secs(1),
            },
        )
    }

    #[test]
    fn per_minute_spacing() {
        assert_eq!(LaneConfig::per_minute(30).min_interval, Duration::from_secs(2));
        assert_eq!(LaneConfig::per_minute(120).min_interval, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_are_spaced_out() {
        let lane = lane();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        let calls = (0..3).map(|i| {
            let lane = lane.clone();
            let starts = Arc::clone(&starts);
            async move {
                lane.submit(move || {
                    let starts = Arc::clone(&starts);
                    async move {
                        starts.lock().unwrap().push(Instant::now());
                        Ok::<_, FuseError>(i)
                    }
                })
                .await
            }
        });
        let results = futures::future::join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let starts = starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 3);
        assert!(starts[2].duration_since(origin) >= Duration::from_secs(4));
        for pair in starts.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_calls_are_retried() {
        let lane = lane();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let value = lane
            .submit(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FuseError::RateLimited("429".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let lane = lane();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let err = lane
            .submit(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(FuseError::RateLimited("429".into()))
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let lane = lane();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = lane
            .submit(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(FuseError::InvalidData("bad payload".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_calls_are_skipped() {
        let lane = lane();
        let origin = Instant::now();
        lane.submit(|| async { Ok::<_, FuseError>(0) }).await.unwrap();

        // Queued behind the 2s spacing, given up on after 500ms
        let skipped = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&skipped);
        let gave_up = tokio::time::timeout(
            Duration::from_millis(500),
            lane.submit(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, FuseError>(1)
                }
            }),
        )
        .await;
        assert!(gave_up.is_err());

        let value = lane.submit(|| async { Ok::<_, FuseError>(2) }).await.unwrap();
        assert_eq!(value, 2);
        assert_eq!(skipped.load(Ordering::SeqCst), 0);
        // took the abandoned call's slot instead of waiting behind it
        assert!(origin.elapsed() < Duration::from_secs(3));
    }
}
