use super::*;

use crate::testutil::{MockFactory, MockSigner, test_config};

fn mock_pool(pool_size: usize) -> (Pool, Arc<MockSigner>, Arc<MockFactory>) {
    let signer = MockSigner::new();
    let factory = MockFactory::new();
    let pool = Pool::new(test_config(pool_size), signer.clone(), factory.clone());
    (pool, signer, factory)
}

/// Age the single idle connection past the given lifetime.
fn age_idle_connection(pool: &Pool, age: Duration) {
    let mut idle = pool.idle.lock();
    let pooled = idle.front_mut().expect("an idle connection");
    pooled.created_at = Instant::now()
        .checked_sub(age)
        .expect("test age within uptime");
}

fn stale_config(pool_size: usize) -> ResolvedConfig {
    Config::new("mycluster.dsql.us-east-1.on.aws")
        .with_pool_size(pool_size)
        .with_max_lifetime_secs(1)
        .resolve()
        .expect("test config resolves")
}

#[tokio::test]
async fn checkout_runs_work_and_reuses_connection() {
    let (pool, _signer, factory) = mock_pool(2);

    let value = pool
        .with(|conn| async move { conn.execute("SELECT 1", &[]).await })
        .await
        .expect("work runs");
    assert_eq!(value, 0);
    assert_eq!(factory.count(), 1);
    assert_eq!(pool.stats().idle(), 1);

    // A second checkout reuses the idle connection.
    pool.with(|conn| async move { conn.execute("SELECT 1", &[]).await })
        .await
        .expect("work runs");
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn work_error_still_releases_the_slot() {
    let (pool, _signer, factory) = mock_pool(1);

    let result: Result<()> = pool
        .with(|_conn| async move { Err(Error::query("boom")) })
        .await;
    assert!(result.is_err());

    // The slot and the connection are both available again.
    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("pool still usable");
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn stale_connection_is_replaced_at_checkout() {
    let signer = MockSigner::new();
    let factory = MockFactory::new();
    let pool = Pool::new(stale_config(2), signer, factory.clone());

    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("first checkout");
    assert_eq!(factory.count(), 1);

    age_idle_connection(&pool, Duration::from_secs(5));

    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("second checkout");

    // The aged connection was discarded and closed, a fresh one created.
    assert_eq!(factory.count(), 2);
    assert!(factory.connection(0).is_closed());
    assert!(!factory.connection(1).is_closed());
}

#[tokio::test]
async fn connection_under_lifetime_is_kept() {
    let signer = MockSigner::new();
    let factory = MockFactory::new();
    let pool = Pool::new(stale_config(2), signer, factory.clone());

    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("first checkout");
    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("second checkout");

    assert_eq!(factory.count(), 1);
    assert!(!factory.connection(0).is_closed());
}

#[tokio::test]
async fn checkout_times_out_when_all_slots_busy() {
    let (mut pool, _signer, _factory) = mock_pool(1);
    pool.set_checkout_timeout(Duration::from_millis(50));
    let pool = Arc::new(pool);

    let holder = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            pool.with(|_conn| async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(())
            })
            .await
        })
    };

    // Give the holder time to take the only slot.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = pool
        .with(|_conn| async move { Ok(()) })
        .await
        .expect_err("should time out");
    assert!(matches!(err, Error::Timeout(_)));

    holder.await.expect("join").expect("holder finishes");
}

#[tokio::test]
async fn shutdown_closes_connections_and_blocks_checkout() {
    let (pool, _signer, factory) = mock_pool(2);

    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("checkout");
    assert_eq!(pool.stats().idle(), 1);

    pool.shutdown().await;

    assert!(factory.connection(0).is_closed());
    assert_eq!(pool.stats().idle(), 0);

    let err = pool
        .with(|_conn| async move { Ok(()) })
        .await
        .expect_err("pool is shut down");
    assert!(err.to_string().contains("shut down"));
}

#[tokio::test]
async fn connection_returned_after_shutdown_is_closed() {
    let (pool, _signer, factory) = mock_pool(1);
    let pool = Arc::new(pool);

    {
        let pool_inner = Arc::clone(&pool);
        pool.with(|_conn| async move {
            pool_inner.shutdown().await;
            Ok(())
        })
        .await
        .expect("work runs");
    }

    // The checked-out connection was closed on return, not re-pooled.
    assert!(factory.connection(0).is_closed());
    assert_eq!(pool.stats().idle(), 0);
}

#[tokio::test]
async fn clear_token_cache_forces_fresh_token_on_next_connection() {
    let signer = MockSigner::new();
    let factory = MockFactory::new();
    let pool = Pool::new(stale_config(2), signer.clone(), factory.clone());

    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("checkout");
    assert_eq!(signer.count(), 1);

    // Replacing a stale connection reuses the cached token.
    age_idle_connection(&pool, Duration::from_secs(5));
    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("checkout");
    assert_eq!(signer.count(), 1);

    // After clearing the cache, the next replacement mints a new one.
    pool.clear_token_cache().await;
    age_idle_connection(&pool, Duration::from_secs(5));
    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("checkout");
    assert_eq!(signer.count(), 2);
    assert_eq!(factory.count(), 3);
}

#[tokio::test]
async fn factory_failure_propagates_and_frees_the_slot() {
    let (pool, _signer, factory) = mock_pool(1);
    factory.fail_next(1);

    let err = pool
        .with(|_conn| async move { Ok(()) })
        .await
        .expect_err("creation fails");
    assert!(matches!(err, Error::Connection(_)));

    // The permit was released; the pool recovers once the factory does.
    pool.with(|_conn| async move { Ok(()) })
        .await
        .expect("pool recovered");
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn stats_track_occupancy() {
    let (pool, _signer, _factory) = mock_pool(2);

    let stats = pool.stats();
    assert_eq!(stats.total(), 0);

    pool.with(|_conn| async move {
        Ok(())
    })
    .await
    .expect("checkout");

    let stats = pool.stats();
    assert_eq!(stats.idle(), 1);
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.total(), 1);
}
