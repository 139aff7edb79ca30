use super::*;
use crate::{
    keys::{ListFilters, UserKeys},
    test_support::sample_user,
};
use shared::error::Operation;
use std::sync::atomic::{AtomicUsize, Ordering};

fn listed(count: i64) -> Vec<ListedUser> {
    (1..=count).map(|id| ListedUser::server(sample_user(id))).collect()
}

async fn load_users(
    calls: Arc<AtomicUsize>,
    count: i64,
    delay: Duration,
) -> Result<Vec<ListedUser>, ClientError> {
    calls.fetch_add(1, Ordering::SeqCst);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Ok(listed(count))
}

async fn fail_load(calls: Arc<AtomicUsize>, status: u16) -> Result<Vec<ListedUser>, ClientError> {
    calls.fetch_add(1, Ordering::SeqCst);
    Err(ClientError::Remote {
        operation: Operation::List,
        status,
    })
}

#[test]
fn write_then_read_returns_value_as_fresh() {
    let cache = QueryCache::new();
    cache.write(UserKeys::detail(UserId(1)), sample_user(1));

    let entry = cache
        .read::<UserRecord>(&UserKeys::detail(UserId(1)))
        .expect("entry");
    assert_eq!(entry.value, sample_user(1));
    assert_eq!(entry.status, EntryStatus::Fresh);
}

#[test]
fn read_of_missing_key_is_absent() {
    let cache = QueryCache::new();
    assert!(cache.read::<Vec<ListedUser>>(&UserKeys::lists()).is_none());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn empty_cache_fetch_calls_loader_once_and_stores_fresh() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let users: Vec<ListedUser> = cache
        .fetch_and_store(UserKeys::lists(), move || {
            load_users(loader_calls, 3, Duration::ZERO)
        })
        .await
        .expect("fetch");

    assert_eq!(users.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let entry = cache
        .read::<Vec<ListedUser>>(&UserKeys::lists())
        .expect("stored");
    assert_eq!(entry.value.len(), 3);
    assert_eq!(entry.status, EntryStatus::Fresh);

    let loader_calls = Arc::clone(&calls);
    let again: Vec<ListedUser> = cache
        .fetch_and_store(UserKeys::lists(), move || {
            load_users(loader_calls, 5, Duration::ZERO)
        })
        .await
        .expect("cached");
    assert_eq!(again.len(), 3, "fresh entry must be served without loading");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn entries_turn_stale_after_stale_time() {
    let cache = QueryCache::new();
    cache.write(UserKeys::lists(), listed(2));

    tokio::time::advance(DEFAULT_STALE_TIME).await;
    assert_eq!(
        cache
            .read::<Vec<ListedUser>>(&UserKeys::lists())
            .expect("entry")
            .status,
        EntryStatus::Fresh
    );

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(
        cache
            .read::<Vec<ListedUser>>(&UserKeys::lists())
            .expect("entry")
            .status,
        EntryStatus::Stale
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let loader_calls = Arc::clone(&calls);
    let users: Vec<ListedUser> = cache
        .fetch_and_store(UserKeys::lists(), move || {
            load_users(loader_calls, 4, Duration::ZERO)
        })
        .await
        .expect("refetch");
    assert_eq!(users.len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn invalidate_marks_prefix_matches_stale_and_is_idempotent() {
    let cache = QueryCache::new();
    let filtered = UserKeys::list(ListFilters::from([("q".to_string(), "ann".to_string())]));
    cache.write(UserKeys::lists(), listed(3));
    cache.write(filtered.clone(), listed(1));
    cache.write(UserKeys::detail(UserId(1)), sample_user(1));

    assert_eq!(cache.invalidate(&UserKeys::lists()), 2);
    let statuses = |cache: &QueryCache| {
        (
            cache
                .read::<Vec<ListedUser>>(&UserKeys::lists())
                .map(|entry| entry.status),
            cache.read::<Vec<ListedUser>>(&filtered).map(|entry| entry.status),
            cache
                .read::<UserRecord>(&UserKeys::detail(UserId(1)))
                .map(|entry| entry.status),
        )
    };
    let once = statuses(&cache);
    assert_eq!(
        once,
        (
            Some(EntryStatus::Stale),
            Some(EntryStatus::Stale),
            Some(EntryStatus::Fresh)
        )
    );

    assert_eq!(cache.invalidate(&UserKeys::lists()), 2);
    assert_eq!(statuses(&cache), once);
    assert_eq!(
        cache
            .read::<Vec<ListedUser>>(&UserKeys::lists())
            .expect("kept")
            .value
            .len(),
        3,
        "invalidation keeps the stale value readable"
    );
}

#[tokio::test(start_paused = true)]
async fn concurrent_fetches_share_one_load() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first_calls = Arc::clone(&calls);
    let second_calls = Arc::clone(&calls);
    let (first, second) = tokio::join!(
        cache.fetch_and_store(UserKeys::lists(), move || {
            load_users(first_calls, 3, Duration::from_millis(50))
        }),
        cache.fetch_and_store(UserKeys::lists(), move || {
            load_users(second_calls, 7, Duration::from_millis(50))
        }),
    );

    let first: Vec<ListedUser> = first.expect("first");
    let second: Vec<ListedUser> = second.expect("second");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first, second);
    assert_eq!(first.len(), 3);
    assert!(!cache.is_fetching(&UserKeys::lists()));
}

#[tokio::test(start_paused = true)]
async fn stale_entry_reports_fetching_while_load_runs() {
    let cache = QueryCache::new();
    cache.write(UserKeys::lists(), listed(2));
    cache.invalidate(&UserKeys::lists());
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let (loaded, observed) = tokio::join!(
        cache.fetch_and_store(UserKeys::lists(), move || {
            load_users(loader_calls, 3, Duration::from_millis(50))
        }),
        async {
            tokio::task::yield_now().await;
            cache.read::<Vec<ListedUser>>(&UserKeys::lists())
        },
    );

    let observed = observed.expect("entry");
    assert_eq!(observed.status, EntryStatus::Fetching);
    assert_eq!(observed.value.len(), 2);
    let loaded: Vec<ListedUser> = loaded.expect("load");
    assert_eq!(loaded.len(), 3);
    assert_eq!(
        cache
            .read::<Vec<ListedUser>>(&UserKeys::lists())
            .expect("entry")
            .status,
        EntryStatus::Fresh
    );
}

#[tokio::test]
async fn failed_load_keeps_stale_value_and_surfaces_error() {
    let cache = QueryCache::new();
    cache.write(UserKeys::lists(), listed(2));
    cache.invalidate(&UserKeys::lists());
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let err = cache
        .fetch_and_store::<Vec<ListedUser>, _, _>(UserKeys::lists(), move || {
            fail_load(loader_calls, 503)
        })
        .await
        .expect_err("load fails");

    assert_eq!(err.status(), Some(503));
    let entry = cache
        .read::<Vec<ListedUser>>(&UserKeys::lists())
        .expect("stale value kept");
    assert_eq!(entry.value.len(), 2);
    assert_eq!(entry.status, EntryStatus::Stale);
}

#[tokio::test]
async fn failed_load_on_empty_cache_stores_nothing() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let result = cache
        .fetch_and_store::<Vec<ListedUser>, _, _>(UserKeys::lists(), move || {
            fail_load(loader_calls, 500)
        })
        .await;

    assert!(result.is_err());
    assert!(!cache.contains(&UserKeys::lists()));
    assert!(!cache.is_fetching(&UserKeys::lists()));
}

#[tokio::test(start_paused = true)]
async fn cancelled_load_resolves_waiters_without_storing() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let (loaded, cancelled) = tokio::join!(
        cache.fetch_and_store(UserKeys::lists(), move || {
            load_users(loader_calls, 3, Duration::from_millis(50))
        }),
        async {
            tokio::task::yield_now().await;
            cache.cancel(&UserKeys::lists())
        },
    );

    assert_eq!(cancelled, 1);
    let loaded: Vec<ListedUser> = loaded.expect("waiter still resolves");
    assert_eq!(loaded.len(), 3);
    assert!(!cache.contains(&UserKeys::lists()));
}

#[tokio::test(start_paused = true)]
async fn write_during_load_wins_over_the_older_response() {
    let cache = QueryCache::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let (loaded, written_status) = tokio::join!(
        cache.fetch_and_store(UserKeys::lists(), move || {
            load_users(loader_calls, 3, Duration::from_millis(50))
        }),
        async {
            tokio::task::yield_now().await;
            cache.write(UserKeys::lists(), listed(1));
            cache
                .read::<Vec<ListedUser>>(&UserKeys::lists())
                .expect("written entry")
                .status
        },
    );

    assert_eq!(written_status, EntryStatus::Fresh);
    let loaded: Vec<ListedUser> = loaded.expect("load");
    assert_eq!(loaded.len(), 3);
    let entry = cache
        .read::<Vec<ListedUser>>(&UserKeys::lists())
        .expect("entry");
    assert_eq!(entry.value.len(), 1);
    assert_eq!(entry.status, EntryStatus::Fresh);
}

#[tokio::test(start_paused = true)]
async fn abandoned_load_still_completes_and_stores() {
    let cache = QueryCache::new();
    cache.write(UserKeys::lists(), listed(2));
    cache.invalidate(&UserKeys::lists());
    let calls = Arc::new(AtomicUsize::new(0));

    let loader_calls = Arc::clone(&calls);
    let abandoned = tokio::time::timeout(
        Duration::from_millis(10),
        cache.fetch_and_store(UserKeys::lists(), move || {
            load_users(loader_calls, 3, Duration::from_millis(50))
        }),
    )
    .await;
    assert!(abandoned.is_err(), "caller gave up before the load finished");
    assert!(cache.is_fetching(&UserKeys::lists()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!cache.is_fetching(&UserKeys::lists()));
    let entry = cache
        .read::<Vec<ListedUser>>(&UserKeys::lists())
        .expect("entry");
    assert_eq!(entry.value.len(), 3);
    assert_eq!(entry.status, EntryStatus::Fresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn invalidated_load_is_not_reported_as_fetching() {
    let cache = QueryCache::new();
    cache.write(UserKeys::lists(), listed(2));
    cache.invalidate(&UserKeys::lists());
    let calls = Arc::new(AtomicUsize::new(0));

    let first_calls = Arc::clone(&calls);
    let second_calls = Arc::clone(&calls);
    let (first, second) = tokio::join!(
        cache.fetch_and_store(UserKeys::lists(), move || {
            load_users(first_calls, 3, Duration::from_millis(50))
        }),
        async {
            tokio::task::yield_now().await;
            cache.invalidate(&UserKeys::lists());
            let status = cache
                .read::<Vec<ListedUser>>(&UserKeys::lists())
                .expect("entry")
                .status;
            assert_eq!(status, EntryStatus::Stale);
            cache
                .fetch_and_store(UserKeys::lists(), move || {
                    load_users(second_calls, 4, Duration::from_millis(50))
                })
                .await
        },
    );

    let first: Vec<ListedUser> = first.expect("first load");
    let second: Vec<ListedUser> = second.expect("second load");
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let entry = cache
        .read::<Vec<ListedUser>>(&UserKeys::lists())
        .expect("entry");
    assert_eq!(entry.value.len(), 4);
}

#[test]
fn update_rewrites_present_entries_only() {
    let cache = QueryCache::new();
    assert!(!cache.update::<Vec<ListedUser>, _>(&UserKeys::lists(), |users| users));
    assert!(!cache.contains(&UserKeys::lists()));

    cache.write(UserKeys::lists(), listed(2));
    cache.invalidate(&UserKeys::lists());
    assert!(cache.update::<Vec<ListedUser>, _>(&UserKeys::lists(), |mut users| {
        users.pop();
        users
    }));
    let entry = cache
        .read::<Vec<ListedUser>>(&UserKeys::lists())
        .expect("entry");
    assert_eq!(entry.value.len(), 1);
    assert_eq!(entry.status, EntryStatus::Fresh);
}

#[test]
fn remove_drops_the_entry() {
    let cache = QueryCache::new();
    cache.write(UserKeys::detail(UserId(3)), sample_user(3));
    assert!(cache.remove(&UserKeys::detail(UserId(3))));
    assert!(cache.read::<UserRecord>(&UserKeys::detail(UserId(3))).is_none());
    assert!(!cache.remove(&UserKeys::detail(UserId(3))));
}

#[test]
fn shape_mismatch_reads_as_absent() {
    let cache = QueryCache::new();
    cache.write(UserKeys::lists(), listed(1));
    assert!(cache.read::<UserRecord>(&UserKeys::lists()).is_none());
    assert_eq!(cache.keys(), vec![UserKeys::lists()]);
}

#[test]
fn pending_rows_render_under_their_own_key() {
    let server = ListedUser::server(sample_user(11));
    let pending = ListedUser::pending(sample_user(11));
    assert_eq!(server.id(), pending.id());
    assert_ne!(server.render_key(), pending.render_key());
    assert!(pending.is_pending());
    assert!(!server.is_pending());
}
