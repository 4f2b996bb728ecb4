//! Periodic snapshots as streams
//!
//! Every refresh path of the kiosk (network health, reservation sync and the
//! session heartbeat) is a [`poll`] stream. Consumers only see a `Stream`, so
//! a push source can replace a poller without touching them.

use std::{future::Future, sync::Arc, time::Duration};

use booking::{LabTimezone, models::Reservation};
use chrono::{DateTime, NaiveDate, Utc};
use futures::{Stream, StreamExt, stream};
use serde::Serialize;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{Interval, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    remote::{HttpBackend, ReservationFeed},
    session::{RemoteCheck, SessionManager},
};

/// Lazy, endless stream of `fetch()` results, one per `period`
///
/// The first snapshot is taken immediately. Slow fetches delay later ticks
/// instead of bunching them up.
pub fn poll<T, F, Fut>(period: Duration, fetch: F) -> impl Stream<Item = T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = T>,
{
    stream::unfold(
        (None::<Interval>, fetch),
        move |(ticker, mut fetch)| async move {
            let mut ticker = ticker.unwrap_or_else(|| {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            ticker.tick().await;
            let snapshot = fetch().await;
            Some((snapshot, (Some(ticker), fetch)))
        },
    )
}

/// Drain `snapshots` into a watch channel until every receiver is gone
pub fn publish<T, S>(snapshots: S, sender: watch::Sender<T>) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    tokio::spawn(async move {
        let mut snapshots = std::pin::pin!(snapshots);
        while let Some(snapshot) = snapshots.next().await {
            if sender.send(snapshot).is_err() {
                debug!("No receivers left, stopping subscription");
                break;
            }
        }
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    pub online: bool,
    pub checked_at: Option<DateTime<Utc>>,
}

impl NetworkStatus {
    pub fn unknown() -> Self {
        Self {
            online: false,
            checked_at: None,
        }
    }
}

pub fn network_health(
    backend: HttpBackend,
    period: Duration,
) -> impl Stream<Item = NetworkStatus> {
    poll(period, move || {
        let backend = backend.clone();
        async move {
            let online = match backend.ping().await {
                Ok(()) => true,
                Err(e) => {
                    debug!("Backend health check failed: {}", e);
                    false
                }
            };
            NetworkStatus {
                online,
                checked_at: Some(Utc::now()),
            }
        }
    })
}

/// Today's reservations for the kiosk's lab
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationSnapshot {
    pub date: Option<NaiveDate>,
    pub reservations: Vec<Reservation>,
    /// When the list was last refreshed successfully
    pub synced_at: Option<DateTime<Utc>>,
}

impl ReservationSnapshot {
    pub fn empty() -> Self {
        Self {
            date: None,
            reservations: Vec::new(),
            synced_at: None,
        }
    }
}

/// Reservation sync; a failed fetch repeats the last good snapshot
pub fn reservation_sync(
    feed: Arc<dyn ReservationFeed>,
    lab_id: i32,
    timezone: LabTimezone,
    period: Duration,
) -> impl Stream<Item = ReservationSnapshot> {
    let last = Arc::new(tokio::sync::Mutex::new(ReservationSnapshot::empty()));

    poll(period, move || {
        let feed = feed.clone();
        let last = last.clone();
        async move {
            let date = timezone.date_of(Utc::now());
            let mut last = last.lock().await;
            match feed.reservations(lab_id, date).await {
                Ok(reservations) => {
                    *last = ReservationSnapshot {
                        date: Some(date),
                        reservations,
                        synced_at: Some(Utc::now()),
                    };
                }
                Err(e) => warn!("Reservation sync for lab {} failed: {}", lab_id, e),
            }
            last.clone()
        }
    })
}

/// Session heartbeat
pub fn heartbeat(
    sessions: Arc<SessionManager>,
    period: Duration,
) -> impl Stream<Item = RemoteCheck> {
    poll(period, move || {
        let sessions = sessions.clone();
        async move {
            match sessions.check_remote().await {
                Ok(check) => check,
                Err(e) => {
                    warn!("Session heartbeat failed: {}", e);
                    RemoteCheck::Unreachable
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_is_lazy_and_sequential() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = poll(Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move { counter.fetch_add(1, Ordering::SeqCst) }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let snapshots: Vec<usize> = stream.take(3).collect().await;
        assert_eq!(snapshots, vec![0, 1, 2]);
    }

    /// Feed that answers once and then goes offline
    struct FlakyFeed {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReservationFeed for FlakyFeed {
        async fn reservations(
            &self,
            _lab_id: i32,
            _date: NaiveDate,
        ) -> RemoteResult<Vec<Reservation>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Vec::new())
            } else {
                Err(RemoteError::Unavailable("offline".into()))
            }
        }
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_last_snapshot() {
        let feed = Arc::new(FlakyFeed {
            calls: AtomicUsize::new(0),
        });
        let snapshots: Vec<ReservationSnapshot> = reservation_sync(
            feed,
            1,
            LabTimezone::utc(),
            Duration::from_millis(5),
        )
        .take(2)
        .collect()
        .await;

        assert!(snapshots[0].synced_at.is_some());
        assert_eq!(snapshots[0], snapshots[1]);
    }

    #[tokio::test]
    async fn test_publish_feeds_watch_channel() {
        let (tx, mut rx) = watch::channel(0usize);
        let handle = publish(stream::iter(1..=3usize), tx);

        handle.await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 3);
    }
}
