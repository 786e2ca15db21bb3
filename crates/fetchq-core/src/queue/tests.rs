//! Queue unit tests over the in-memory SQLite store.

use std::sync::Arc;
use std::time::Duration;

use super::*;

const NO_WAIT: Duration = Duration::ZERO;

async fn memory_queue() -> JobQueue {
    let store = SqliteListStore::open_memory().await.unwrap();
    JobQueue::new(Arc::new(store))
}

mod store_primitives {
    use super::*;
    use crate::queue::store::ListStore;

    #[tokio::test]
    async fn lists_drain_fifo() {
        let store = SqliteListStore::open_memory().await.unwrap();
        store.push_head("a", "first").await.unwrap();
        store.push_head("a", "second").await.unwrap();
        store.push_head("a", "third").await.unwrap();
        assert_eq!(store.list_len("a").await.unwrap(), 3);

        let moved = store.move_tail_to_head("a", "b", NO_WAIT).await.unwrap();
        assert_eq!(moved.as_deref(), Some("first"));
        let moved = store.move_tail_to_head("a", "b", NO_WAIT).await.unwrap();
        assert_eq!(moved.as_deref(), Some("second"));
        assert_eq!(store.list_len("a").await.unwrap(), 1);
        assert_eq!(store.list_len("b").await.unwrap(), 2);
        assert_eq!(store.list_range("b").await.unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn move_from_empty_list_times_out() {
        let store = SqliteListStore::open_memory().await.unwrap();
        let started = std::time::Instant::now();
        let moved = store
            .move_tail_to_head("empty", "b", Duration::from_millis(250))
            .await
            .unwrap();
        assert!(moved.is_none());
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn move_is_never_lossy() {
        let store = SqliteListStore::open_memory().await.unwrap();
        for i in 0..10 {
            store.push_head("src", &format!("job-{i}")).await.unwrap();
        }
        for _ in 0..10 {
            assert!(store
                .move_tail_to_head("src", "dst", NO_WAIT)
                .await
                .unwrap()
                .is_some());
        }
        assert_eq!(store.list_len("src").await.unwrap(), 0);
        assert_eq!(store.list_len("dst").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn remove_exact_takes_one_of_identical_payloads() {
        let store = SqliteListStore::open_memory().await.unwrap();
        store.push_head("a", "dup").await.unwrap();
        store.push_head("a", "dup").await.unwrap();
        assert!(store.remove_exact("a", "dup").await.unwrap());
        assert_eq!(store.list_len("a").await.unwrap(), 1);
        assert!(store.remove_exact("a", "dup").await.unwrap());
        assert!(!store.remove_exact("a", "dup").await.unwrap());
    }

    #[tokio::test]
    async fn replace_exact_swaps_in_place() {
        let store = SqliteListStore::open_memory().await.unwrap();
        store.push_head("a", "old").await.unwrap();
        assert!(store.replace_exact("a", "old", "new").await.unwrap());
        assert!(!store.replace_exact("a", "old", "newer").await.unwrap());
        assert_eq!(store.list_range("a").await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn kv_roundtrip_and_expiry() {
        let store = SqliteListStore::open_memory().await.unwrap();
        store
            .kv_set("k", "v", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(store.kv_get("k").await.unwrap().as_deref(), Some("v"));

        store
            .kv_set("k", "v2", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(store.kv_get("k").await.unwrap().as_deref(), Some("v2"));

        store.kv_set("gone", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.kv_get("gone").await.unwrap(), None);
        assert_eq!(store.kv_get("never-set").await.unwrap(), None);
    }
}

#[tokio::test]
async fn enqueue_sets_pending_and_status() {
    let queue = memory_queue().await;
    let job = Job::new("http://test/10MB", "a.bin", 4);
    queue.enqueue(&job).await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.total(), 1);

    let status = queue.get_status(&job.id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Queued);
    assert_eq!(status.created_at, job.created_at);
}

#[tokio::test]
async fn reserve_moves_and_stamps() {
    let queue = memory_queue().await;
    let job = Job::new("http://test/10MB", "a.bin", 4);
    queue.enqueue(&job).await.unwrap();

    let reserved = queue.reserve("worker-1", NO_WAIT).await.unwrap().unwrap();
    assert_eq!(reserved.id, job.id);
    assert_eq!(reserved.worker_id.as_deref(), Some("worker-1"));
    assert!(reserved.started_at.is_some());

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 1);

    let status = queue.get_status(&job.id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Processing);
    assert_eq!(status.worker_id.as_deref(), Some("worker-1"));

    // The in-flight entry itself carries the stamp, so the sweeper can age it.
    let raw = queue.store.list_range(IN_FLIGHT_LIST).await.unwrap();
    let stored: Job = serde_json::from_str(&raw[0]).unwrap();
    assert_eq!(stored.worker_id.as_deref(), Some("worker-1"));
}

#[tokio::test]
async fn reserve_on_empty_queue_is_none() {
    let queue = memory_queue().await;
    assert!(queue.reserve("w", NO_WAIT).await.unwrap().is_none());
}

#[tokio::test]
async fn reserve_is_fifo() {
    let queue = memory_queue().await;
    let first = Job::new("http://test/1", "1.bin", 1);
    let second = Job::new("http://test/2", "2.bin", 1);
    queue.enqueue(&first).await.unwrap();
    queue.enqueue(&second).await.unwrap();

    assert_eq!(queue.reserve("w", NO_WAIT).await.unwrap().unwrap().id, first.id);
    assert_eq!(queue.reserve("w", NO_WAIT).await.unwrap().unwrap().id, second.id);
}

#[tokio::test]
async fn complete_terminalizes() {
    let queue = memory_queue().await;
    let job = Job::new("http://test/10MB", "a.bin", 4);
    queue.enqueue(&job).await.unwrap();
    queue.reserve("w", NO_WAIT).await.unwrap().unwrap();
    queue.complete(&job.id).await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.completed, 1);

    let status = queue.get_status(&job.id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.progress, 100.0);
    assert!(status.completed_at.is_some());
    // created_at survives the transition (read-modify-write).
    assert_eq!(status.created_at, job.created_at);
}

#[tokio::test]
async fn fail_records_the_message() {
    let queue = memory_queue().await;
    let job = Job::new("http://test/10MB", "a.bin", 4);
    queue.enqueue(&job).await.unwrap();
    queue.reserve("w", NO_WAIT).await.unwrap().unwrap();
    queue.fail(&job.id, "origin returned HTTP 500").await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.failed, 1);

    let status = queue.get_status(&job.id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.error_message.as_deref(), Some("origin returned HTTP 500"));
}

#[tokio::test]
async fn update_progress_preserves_other_fields() {
    let queue = memory_queue().await;
    let job = Job::new("http://test/10MB", "a.bin", 4);
    queue.enqueue(&job).await.unwrap();
    queue.reserve("worker-9", NO_WAIT).await.unwrap().unwrap();

    queue
        .update_progress(&job.id, 42.5, 4_456_448, 10_485_760)
        .await
        .unwrap();

    let status = queue.get_status(&job.id).await.unwrap().unwrap();
    assert_eq!(status.progress, 42.5);
    assert_eq!(status.bytes_downloaded, 4_456_448);
    assert_eq!(status.total_bytes, 10_485_760);
    assert_eq!(status.state, JobState::Processing);
    assert_eq!(status.worker_id.as_deref(), Some("worker-9"));
}

#[tokio::test]
async fn update_progress_recreates_missing_status() {
    let queue = memory_queue().await;
    queue.update_progress("ghost", 10.0, 1, 10).await.unwrap();
    let status = queue.get_status("ghost").await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Processing);
    assert_eq!(status.progress, 10.0);
}

#[tokio::test]
async fn unknown_job_status_is_none() {
    let queue = memory_queue().await;
    assert!(queue.get_status("no-such-id").await.unwrap().is_none());
}

#[tokio::test]
async fn reclaim_returns_stale_job_to_pending() {
    let queue = memory_queue().await;
    let job = Job::new("http://test/10MB", "a.bin", 4);
    queue.enqueue(&job).await.unwrap();
    queue.reserve("dead-worker", NO_WAIT).await.unwrap().unwrap();

    // Everything is stale at threshold zero.
    let reclaimed = queue.reclaim_orphans_older_than(Duration::ZERO).await.unwrap();
    assert_eq!(reclaimed, 1);

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.in_flight, 0);

    let status = queue.get_status(&job.id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Queued);
    assert!(status.worker_id.is_none());

    // A second worker can now reserve it, volatile fields re-stamped.
    let retry = queue.reserve("worker-2", NO_WAIT).await.unwrap().unwrap();
    assert_eq!(retry.id, job.id);
    assert_eq!(retry.worker_id.as_deref(), Some("worker-2"));
}

#[tokio::test]
async fn reclaim_leaves_fresh_jobs_alone() {
    let queue = memory_queue().await;
    let job = Job::new("http://test/10MB", "a.bin", 4);
    queue.enqueue(&job).await.unwrap();
    queue.reserve("live-worker", NO_WAIT).await.unwrap().unwrap();

    let reclaimed = queue.reclaim_orphans_older_than(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(reclaimed, 0);
    assert_eq!(queue.stats().await.unwrap().in_flight, 1);
}

#[tokio::test]
async fn reclaim_parks_unparseable_entries_in_failed() {
    let queue = memory_queue().await;
    queue
        .store
        .push_head(IN_FLIGHT_LIST, "{ not a job")
        .await
        .unwrap();

    let reclaimed = queue.reclaim_orphans_older_than(Duration::ZERO).await.unwrap();
    assert_eq!(reclaimed, 0);
    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn three_jobs_end_in_exactly_one_terminal_list_each() {
    let queue = memory_queue().await;
    let jobs: Vec<Job> = (0..3)
        .map(|i| Job::new(format!("http://test/{i}"), format!("{i}.bin"), 2))
        .collect();
    for job in &jobs {
        queue.enqueue(job).await.unwrap();
    }

    let a = queue.reserve("w1", NO_WAIT).await.unwrap().unwrap();
    let b = queue.reserve("w2", NO_WAIT).await.unwrap().unwrap();
    let c = queue.reserve("w1", NO_WAIT).await.unwrap().unwrap();
    queue.complete(&a.id).await.unwrap();
    queue.fail(&b.id, "boom").await.unwrap();
    queue.complete(&c.id).await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total(), 3);
}
