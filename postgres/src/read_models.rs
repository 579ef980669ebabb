//! Read access to users, images and the follow graph.

use crate::error::{classify, classify_lookup};
use futures::future::BoxFuture;
use snapshare_core::error::Result;
use snapshare_core::model::{Image, ImageId, User, UserId};
use snapshare_core::repository::{FollowRepository, ImageRepository, UserRepository};
use sqlx::PgPool;

/// `PostgreSQL` [`UserRepository`].
#[derive(Clone, Debug)]
pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl UserRepository for PostgresUserRepository {
    fn find_by_id(&self, id: UserId) -> BoxFuture<'_, Result<User>> {
        Box::pin(async move {
            let (id, username): (i64, String) =
                sqlx::query_as("SELECT id, username FROM users WHERE id = $1")
                    .bind(id.get())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| classify_lookup(e, "user", id.get()))?;

            Ok(User {
                id: UserId(id),
                username,
            })
        })
    }
}

/// `PostgreSQL` [`ImageRepository`].
#[derive(Clone, Debug)]
pub struct PostgresImageRepository {
    pool: PgPool,
}

impl PostgresImageRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ImageRepository for PostgresImageRepository {
    fn find_by_id(&self, id: ImageId) -> BoxFuture<'_, Result<Image>> {
        Box::pin(async move {
            let (id, user_id, like_count, comment_count): (i64, i64, i64, i64) = sqlx::query_as(
                "SELECT id, user_id, like_count, comment_count FROM images WHERE id = $1",
            )
            .bind(id.get())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_lookup(e, "image", id.get()))?;

            Ok(Image {
                id: ImageId(id),
                user_id: UserId(user_id),
                like_count,
                comment_count,
            })
        })
    }
}

/// `PostgreSQL` [`FollowRepository`]. Soft-deleted follows are ignored.
#[derive(Clone, Debug)]
pub struct PostgresFollowRepository {
    pool: PgPool,
}

impl PostgresFollowRepository {
    /// Create a repository over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl FollowRepository for PostgresFollowRepository {
    fn followers_of(&self, user: UserId) -> BoxFuture<'_, Result<Vec<UserId>>> {
        Box::pin(async move {
            let rows: Vec<(i64,)> = sqlx::query_as(
                r"
                SELECT follower_id FROM follows
                WHERE following_id = $1 AND deleted_at IS NULL
                ORDER BY follower_id
                ",
            )
            .bind(user.get())
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

            Ok(rows.into_iter().map(|(id,)| UserId(id)).collect())
        })
    }
}
