use sqlx::{Connection, PgConnection};

use crate::models::users::{User, UserId};

#[async_trait::async_trait]
pub trait UserProvider {
    async fn get_user_by_id(&mut self, user_id: UserId) -> Result<Option<User>, sqlx::Error>;

    async fn insert_user(&mut self, username: &str) -> Result<UserId, sqlx::Error>;

    /// Delete a user, clearing every item reference to it first.
    ///
    /// The items themselves are kept. Returns `false` if no user with the id exists.
    async fn delete_user(&mut self, user_id: UserId) -> Result<bool, sqlx::Error>;
}

#[async_trait::async_trait]
impl UserProvider for PgConnection {
    async fn get_user_by_id(&mut self, user_id: UserId) -> Result<Option<User>, sqlx::Error> {
        let res: Result<(UserId, String), _> = sqlx::query_as(
            r#"
                SELECT
                    id, username
                FROM
                    users
                WHERE
                    id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self)
        .await;

        match res {
            Ok((id, username)) => Ok(Some(User { id, username })),
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }


    #[tracing::instrument(skip(self))]
    async fn insert_user(&mut self, username: &str) -> Result<UserId, sqlx::Error> {
        let (id,): (UserId,) = sqlx::query_as(
            r#"
                INSERT INTO users
                    (username)
                VALUES
                    ($1)
                RETURNING
                    id
            "#,
        )
        .bind(username)
        .fetch_one(self)
        .await?;

        Ok(id)
    }


    #[tracing::instrument(skip(self))]
    async fn delete_user(&mut self, user_id: UserId) -> Result<bool, sqlx::Error> {
        let mut trans = self.begin().await?;

        let created = sqlx::query(
            r#"
                UPDATE
                    items
                SET
                    created_by = NULL
                WHERE
                    created_by = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut trans)
        .await?;

        let updated = sqlx::query(
            r#"
                UPDATE
                    items
                SET
                    updated_by = NULL
                WHERE
                    updated_by = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut trans)
        .await?;

        tracing::info!(
            created_by = created.rows_affected(),
            updated_by = updated.rows_affected(),
            "Cleared item references to user"
        );

        let res = sqlx::query(
            r#"
                DELETE FROM
                    users
                WHERE
                    id = $1
            "#,
        )
        .bind(user_id)
        .execute(&mut trans)
        .await?;

        trans.commit().await?;
        Ok(res.rows_affected() > 0)
    }
}
