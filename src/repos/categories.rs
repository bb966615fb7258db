use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use super::{has_error_code, UNIQUE_VIOLATION};
use crate::{
    database::PostgresConnection,
    ledger::domain::categories::{Category, CategoryData},
    models,
};

#[derive(Debug, Error)]
pub enum CategoryPersistenceError {
    #[error("a category named {0:?} already exists")]
    DuplicateName(String),

    #[error("category {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DynCategoryRepo = Arc<dyn CategoryRepo + Send + Sync>;

#[async_trait]
pub trait CategoryRepo {
    async fn create_category(
        &self,
        user_id: &str,
        data: &CategoryData,
    ) -> Result<Category, CategoryPersistenceError>;

    /// Fetch one of an owner's categories.
    ///
    /// # Returns
    ///
    /// [`None`] if the category does not exist or belongs to someone else.
    async fn get_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> anyhow::Result<Option<Category>>;

    /// List an owner's categories ordered by main category, then name.
    async fn list_categories(&self, user_id: &str) -> anyhow::Result<Vec<Category>>;

    /// Rename or move a category. Transactions that already copied the
    /// category's names keep them.
    async fn update_category(
        &self,
        user_id: &str,
        category_id: Uuid,
        data: &CategoryData,
    ) -> Result<Category, CategoryPersistenceError>;

    /// Remove a category. Transactions referencing it lose the reference but
    /// keep their copied names.
    async fn delete_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<Category, CategoryPersistenceError>;

    /// Insert the given categories, skipping names the owner already has.
    ///
    /// # Returns
    ///
    /// The number of categories that were inserted.
    async fn seed_categories(&self, user_id: &str, categories: &[CategoryData])
        -> anyhow::Result<u64>;
}

#[async_trait]
impl CategoryRepo for PostgresConnection {
    async fn create_category(
        &self,
        user_id: &str,
        data: &CategoryData,
    ) -> Result<Category, CategoryPersistenceError> {
        let result = sqlx::query_as::<_, models::ledger::Category>(
            r#"
            INSERT INTO category (id, user_id, name, main_category)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&data.name)
        .bind(data.main_category.as_str())
        .fetch_one(&**self)
        .await;

        match result {
            Ok(model) => Ok(model.try_into()?),
            Err(error) if has_error_code(&error, UNIQUE_VIOLATION) => {
                Err(CategoryPersistenceError::DuplicateName(data.name.clone()))
            }
            Err(error) => Err(anyhow::Error::from(error).into()),
        }
    }

    async fn get_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> anyhow::Result<Option<Category>> {
        let model = sqlx::query_as::<_, models::ledger::Category>(
            "SELECT * FROM category WHERE id = $1 AND user_id = $2",
        )
        .bind(category_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await?;

        model.map(Category::try_from).transpose()
    }

    async fn list_categories(&self, user_id: &str) -> anyhow::Result<Vec<Category>> {
        sqlx::query_as::<_, models::ledger::Category>(
            "SELECT * FROM category WHERE user_id = $1 ORDER BY main_category, name",
        )
        .bind(user_id)
        .fetch_all(&**self)
        .await?
        .into_iter()
        .map(Category::try_from)
        .collect()
    }

    async fn update_category(
        &self,
        user_id: &str,
        category_id: Uuid,
        data: &CategoryData,
    ) -> Result<Category, CategoryPersistenceError> {
        let result = sqlx::query_as::<_, models::ledger::Category>(
            r#"
            UPDATE category
            SET name = $3, main_category = $4
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(category_id)
        .bind(user_id)
        .bind(&data.name)
        .bind(data.main_category.as_str())
        .fetch_optional(&**self)
        .await;

        match result {
            Ok(Some(model)) => Ok(model.try_into()?),
            Ok(None) => Err(CategoryPersistenceError::NotFound(category_id)),
            Err(error) if has_error_code(&error, UNIQUE_VIOLATION) => {
                Err(CategoryPersistenceError::DuplicateName(data.name.clone()))
            }
            Err(error) => Err(anyhow::Error::from(error).into()),
        }
    }

    async fn delete_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<Category, CategoryPersistenceError> {
        let model = sqlx::query_as::<_, models::ledger::Category>(
            "DELETE FROM category WHERE id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(category_id)
        .bind(user_id)
        .fetch_optional(&**self)
        .await
        .map_err(anyhow::Error::from)?;

        match model {
            Some(model) => Ok(model.try_into()?),
            None => Err(CategoryPersistenceError::NotFound(category_id)),
        }
    }

    async fn seed_categories(
        &self,
        user_id: &str,
        categories: &[CategoryData],
    ) -> anyhow::Result<u64> {
        let mut tx = self.begin().await?;
        let mut inserted = 0;

        for category in categories {
            inserted += sqlx::query(
                r#"
                INSERT INTO category (id, user_id, name, main_category)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id, name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(&category.name)
            .bind(category.main_category.as_str())
            .execute(&mut tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        info!(user_id, inserted, "Seeded categories.");

        Ok(inserted)
    }
}
