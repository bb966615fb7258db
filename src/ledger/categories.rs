use thiserror::Error;
use uuid::Uuid;

use super::domain::categories::{Category, MainCategory};
use crate::repos::DynCategoryRepo;

#[derive(Debug, Error)]
pub enum CategoryLookupError {
    #[error("category {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Looks up the names a transaction copies from its category.
#[derive(Clone)]
pub struct CategoryResolver {
    category_repo: DynCategoryRepo,
}

impl CategoryResolver {
    pub fn new(category_repo: DynCategoryRepo) -> Self {
        Self { category_repo }
    }

    /// Find one of an owner's categories.
    ///
    /// # Arguments
    /// * `user_id` - The owner of the category.
    /// * `category_id` - The category to look up.
    ///
    /// # Returns
    ///
    /// The category, or [`CategoryLookupError::NotFound`] if the owner has no
    /// category with that ID.
    pub async fn resolve(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<Category, CategoryLookupError> {
        self.category_repo
            .get_category(user_id, category_id)
            .await?
            .ok_or(CategoryLookupError::NotFound(category_id))
    }

    pub async fn main_category(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<MainCategory, CategoryLookupError> {
        Ok(self.resolve(user_id, category_id).await?.main_category)
    }

    pub async fn subcategory_name(
        &self,
        user_id: &str,
        category_id: Uuid,
    ) -> Result<String, CategoryLookupError> {
        Ok(self.resolve(user_id, category_id).await?.name)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        ledger::domain::categories::CategoryData,
        repos::{memory::MemoryLedger, CategoryRepo},
    };

    #[tokio::test]
    async fn resolves_names_of_owned_category() {
        let ledger = MemoryLedger::new();
        let category = ledger
            .create_category(
                "owner",
                &CategoryData {
                    name: "Groceries".to_owned(),
                    main_category: MainCategory::Needs,
                },
            )
            .await
            .expect("category should be created");
        let resolver = CategoryResolver::new(Arc::new(ledger));

        let main_category = resolver
            .main_category("owner", category.id)
            .await
            .expect("category should resolve");
        let subcategory = resolver
            .subcategory_name("owner", category.id)
            .await
            .expect("category should resolve");

        assert_eq!(MainCategory::Needs, main_category);
        assert_eq!("Groceries", subcategory);
    }

    #[tokio::test]
    async fn category_of_other_owner_is_not_found() {
        let ledger = MemoryLedger::new();
        let category = ledger
            .create_category(
                "owner",
                &CategoryData {
                    name: "Rent".to_owned(),
                    main_category: MainCategory::Needs,
                },
            )
            .await
            .expect("category should be created");
        let resolver = CategoryResolver::new(Arc::new(ledger));

        let result = resolver.resolve("someone else", category.id).await;

        assert!(matches!(result, Err(CategoryLookupError::NotFound(id)) if id == category.id));
    }
}
