//! Atomic counter increments.

use crate::error::classify;
use futures::future::BoxFuture;
use snapshare_core::error::Result;
use snapshare_core::model::{ImageId, UserId};
use snapshare_core::repository::CounterRepository;
use sqlx::PgPool;

const INCREMENT_FOLLOWER: &str = r"
    INSERT INTO user_stats (user_id, follower_count, following_count)
    VALUES ($1, $2, 0)
    ON CONFLICT (user_id) DO UPDATE
    SET follower_count = user_stats.follower_count + EXCLUDED.follower_count
";

const INCREMENT_FOLLOWING: &str = r"
    INSERT INTO user_stats (user_id, follower_count, following_count)
    VALUES ($1, 0, $2)
    ON CONFLICT (user_id) DO UPDATE
    SET following_count = user_stats.following_count + EXCLUDED.following_count
";

const INCREMENT_BOTH: &str = r"
    INSERT INTO user_stats (user_id, follower_count, following_count)
    VALUES ($1, $2, $3)
    ON CONFLICT (user_id) DO UPDATE
    SET follower_count = user_stats.follower_count + EXCLUDED.follower_count,
        following_count = user_stats.following_count + EXCLUDED.following_count
";

const INCREMENT_LIKES: &str = "UPDATE images SET like_count = like_count + $2 WHERE id = $1";

const INCREMENT_COMMENTS: &str =
    "UPDATE images SET comment_count = comment_count + $2 WHERE id = $1";

/// `PostgreSQL` [`CounterRepository`].
///
/// User stats are upserted, so a user without a stats row gets one. Image
/// counters are plain updates; an increment for a missing image is logged and
/// skipped.
///
/// # Example
///
/// ```no_run
/// use snapshare_core::model::ImageId;
/// use snapshare_core::repository::CounterRepository;
/// use snapshare_postgres::PostgresCounterRepository;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let counters = PostgresCounterRepository::new(pool);
/// counters.increment_like_count(ImageId(100), 3).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresCounterRepository {
    pool: PgPool,
}

impl PostgresCounterRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert_user_stat(&self, sql: &'static str, user: UserId, deltas: &[i64]) -> Result<()> {
        let mut query = sqlx::query(sql).bind(user.get());
        for delta in deltas {
            query = query.bind(*delta);
        }
        query.execute(&self.pool).await.map_err(classify)?;
        Ok(())
    }

    async fn update_image(&self, sql: &'static str, image: ImageId, delta: i64) -> Result<()> {
        let result = sqlx::query(sql)
            .bind(image.get())
            .bind(delta)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        if result.rows_affected() == 0 {
            tracing::debug!(image_id = %image, delta, "Image not found, counter update skipped");
            metrics::counter!("counter_updates_skipped_total").increment(1);
        }
        Ok(())
    }
}

impl CounterRepository for PostgresCounterRepository {
    fn increment_follower_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.upsert_user_stat(INCREMENT_FOLLOWER, user, &[delta]).await })
    }

    fn increment_following_count(&self, user: UserId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.upsert_user_stat(INCREMENT_FOLLOWING, user, &[delta]).await })
    }

    fn increment_both(
        &self,
        user: UserId,
        follower_delta: i64,
        following_delta: i64,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.upsert_user_stat(INCREMENT_BOTH, user, &[follower_delta, following_delta])
                .await
        })
    }

    fn increment_like_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.update_image(INCREMENT_LIKES, image, delta))
    }

    fn increment_comment_count(&self, image: ImageId, delta: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.update_image(INCREMENT_COMMENTS, image, delta))
    }
}
