use sqlx::{FromRow, PgConnection};
use time::OffsetDateTime;
use validator::Validate;

use crate::db::Error;
use crate::models;
use crate::models::items::{ItemChanges, ItemId};
use crate::models::users::UserId;

const ITEM_COLUMNS: &str = r#"
    id, title, image, shooting_time, geo_location, location,
    created_by, created_at, updated_by, updated_at
"#;

#[derive(Debug, FromRow)]
pub struct Item {
    pub id: ItemId,
    pub title: Option<String>,
    pub image: Option<String>,
    pub shooting_time: Option<OffsetDateTime>,
    pub geo_location: Option<String>,
    pub location: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_by: Option<UserId>,
    pub updated_at: Option<OffsetDateTime>,
}

impl From<Item> for models::items::Item {
    fn from(i: Item) -> Self {
        models::items::Item {
            id: i.id,
            title: i.title,
            image: i.image,
            shooting_time: i.shooting_time,
            geo_location: i.geo_location,
            location: i.location,
            created_by: i.created_by,
            created_at: i.created_at,
            updated_by: i.updated_by,
            updated_at: i.updated_at,
        }
    }
}

#[async_trait::async_trait]
pub trait ItemProvider {
    async fn get_item_by_id(
        &mut self,
        item_id: ItemId,
    ) -> Result<Option<models::items::Item>, sqlx::Error>;

    async fn get_items(&mut self, limit: i64) -> Result<Vec<models::items::Item>, sqlx::Error>;

    /// Validate `changes` and store them as a new item created by `actor`.
    async fn insert_item(
        &mut self,
        changes: &ItemChanges,
        actor: Option<UserId>,
    ) -> Result<ItemId, Error>;

    /// Validate `changes` and write them over the stored item.
    ///
    /// Returns `false` if no item with the id exists.
    async fn update_item(
        &mut self,
        item_id: ItemId,
        changes: &ItemChanges,
        actor: Option<UserId>,
    ) -> Result<bool, Error>;

    async fn delete_item(&mut self, item_id: ItemId) -> Result<bool, sqlx::Error>;
}

#[async_trait::async_trait]
impl ItemProvider for PgConnection {
    async fn get_item_by_id(
        &mut self,
        item_id: ItemId,
    ) -> Result<Option<models::items::Item>, sqlx::Error> {
        let query = format!(
            r#"
                SELECT
                    {}
                FROM
                    items
                WHERE
                    id = $1
            "#,
            ITEM_COLUMNS,
        );

        let res: Result<Item, _> = sqlx::query_as(&query).bind(item_id).fetch_one(self).await;

        match res {
            Ok(item) => Ok(Some(item.into())),
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }


    async fn get_items(&mut self, limit: i64) -> Result<Vec<models::items::Item>, sqlx::Error> {
        let query = format!(
            r#"
                SELECT
                    {}
                FROM
                    items
                ORDER BY
                    id DESC
                LIMIT $1
            "#,
            ITEM_COLUMNS,
        );

        let res: Vec<Item> = sqlx::query_as(&query).bind(limit).fetch_all(self).await?;

        Ok(res.into_iter().map(models::items::Item::from).collect())
    }


    #[tracing::instrument(skip(self, changes))]
    async fn insert_item(
        &mut self,
        changes: &ItemChanges,
        actor: Option<UserId>,
    ) -> Result<ItemId, Error> {
        changes.validate()?;
        let now = OffsetDateTime::now_utc();

        let (id,): (ItemId,) = sqlx::query_as(
            r#"
                INSERT INTO items
                    (title, image, shooting_time, geo_location, location,
                     created_by, created_at, updated_by, updated_at)
                VALUES
                    ($1, $2, $3, $4, $5, $6, $7, $6, $7)
                RETURNING
                    id
            "#,
        )
        .bind(changes.title_or_default())
        .bind(&changes.image)
        .bind(changes.shooting_time)
        .bind(changes.geo_location_or_default())
        .bind(changes.location_or_default())
        .bind(actor)
        .bind(now)
        .fetch_one(self)
        .await?;

        tracing::info!(item_id = id, "Created item");
        Ok(id)
    }


    #[tracing::instrument(skip(self, changes))]
    async fn update_item(
        &mut self,
        item_id: ItemId,
        changes: &ItemChanges,
        actor: Option<UserId>,
    ) -> Result<bool, Error> {
        changes.validate()?;

        let old_item = match self.get_item_by_id(item_id).await? {
            Some(item) => item,
            None => return Ok(false),
        };

        let old_changes = old_item.changes();
        if old_changes.title != changes.title {
            tracing::info!("Title differs, updating");
        }
        if old_changes.image != changes.image {
            tracing::info!("Image differs, updating");
        }
        if old_changes.shooting_time != changes.shooting_time {
            tracing::info!("Shooting time differs, updating");
        }
        if old_changes.geo_location != changes.geo_location {
            tracing::info!("Geo location differs, updating");
        }
        if old_changes.location != changes.location {
            tracing::info!("Location differs, updating");
        }

        let res = sqlx::query(
            r#"
                UPDATE
                    items
                SET
                    title = $2,
                    image = $3,
                    shooting_time = $4,
                    geo_location = $5,
                    location = $6,
                    updated_by = $7,
                    updated_at = $8
                WHERE
                    id = $1
            "#,
        )
        .bind(item_id)
        .bind(changes.title_or_default())
        .bind(&changes.image)
        .bind(changes.shooting_time)
        .bind(changes.geo_location_or_default())
        .bind(changes.location_or_default())
        .bind(actor)
        .bind(OffsetDateTime::now_utc())
        .execute(self)
        .await?;

        Ok(res.rows_affected() > 0)
    }


    #[tracing::instrument(skip(self))]
    async fn delete_item(&mut self, item_id: ItemId) -> Result<bool, sqlx::Error> {
        let res = sqlx::query(
            r#"
                DELETE FROM
                    items
                WHERE
                    id = $1
            "#,
        )
        .bind(item_id)
        .execute(self)
        .await?;

        Ok(res.rows_affected() > 0)
    }
}
