//! Toy catalog management service

use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{inventory, with_retries};
use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{
        item::{CreateItem, ItemQuery, ItemSort, UpdateItem},
        matches_search, Item, ItemStatus,
    },
    repository::{item_not_found, Repository},
};

#[derive(Clone)]
pub struct CatalogService {
    store: Repository,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl CatalogService {
    pub fn new(store: Repository, clock: Arc<dyn Clock>, max_retries: u32) -> Self {
        Self {
            store,
            clock,
            max_retries,
        }
    }

    /// Search items with filters
    pub async fn list_items(&self, query: &ItemQuery) -> AppResult<Vec<Item>> {
        let mut items: Vec<Item> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .filter(|item| match query.category.as_deref().map(str::trim) {
                None | Some("") => true,
                Some(category) => item
                    .category
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(category)),
            })
            .filter(|item| matches_search(query.search.as_deref(), &[&item.name]))
            .collect();

        match query.sort.unwrap_or_default() {
            // Store order is already newest first
            ItemSort::Newest => {}
            ItemSort::Az => items.sort_by_key(|i| i.name.to_lowercase()),
            ItemSort::Za => {
                items.sort_by_key(|i| i.name.to_lowercase());
                items.reverse();
            }
        }
        Ok(items)
    }

    pub async fn get_item(&self, id: Uuid) -> AppResult<Item> {
        self.store.get_item(id).await
    }

    /// Distinct categories in use, sorted
    pub async fn categories(&self) -> AppResult<Vec<String>> {
        let mut categories: Vec<String> = self
            .store
            .list_items()
            .await?
            .into_iter()
            .filter_map(|i| i.category)
            .filter(|c| !c.trim().is_empty())
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    pub async fn create_item(&self, request: CreateItem) -> AppResult<Item> {
        request.validate()?;
        let total_quantity = request.total_quantity.unwrap_or(request.quantity);
        if total_quantity < 1 {
            return Err(AppError::Validation(
                "Total quantity must be at least 1".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut item = Item {
            id: Uuid::new_v4(),
            name: request.name.trim().to_string(),
            category: request.category,
            age_group: request.age_group,
            description: request.description,
            quantity: request.quantity,
            total_quantity,
            status: match request.status {
                Some(ItemStatus::NotAvailable) => ItemStatus::NotAvailable,
                _ => ItemStatus::Available,
            },
            images: request.images,
            created_at: now,
            updated_at: now,
        };
        inventory::normalize(&mut item);

        with_retries(self.max_retries, "create_item", || self.try_create_item(&item)).await?;

        tracing::info!(item_id = %item.id, name = %item.name, "Item created");
        Ok(item)
    }

    async fn try_create_item(&self, item: &Item) -> AppResult<()> {
        let mut tx = self.store.begin().await?;
        tx.insert_item(item).await?;
        tx.commit().await
    }

    /// Apply an admin edit. Quantities are clamped and the status re-derived
    /// unless the edit locks the item.
    pub async fn update_item(&self, id: Uuid, request: UpdateItem) -> AppResult<Item> {
        request.validate()?;
        let item = with_retries(self.max_retries, "update_item", move || {
            self.try_update_item(id, request.clone())
        })
        .await?;

        tracing::info!(
            item_id = %id,
            quantity = item.quantity,
            total_quantity = item.total_quantity,
            status = %item.status,
            "Item updated"
        );
        Ok(item)
    }

    async fn try_update_item(&self, id: Uuid, request: UpdateItem) -> AppResult<Item> {
        let mut tx = self.store.begin().await?;
        let mut item = tx.item(id).await?.ok_or_else(|| item_not_found(id))?;

        if let Some(name) = request.name {
            item.name = name.trim().to_string();
        }
        if request.category.is_some() {
            item.category = request.category;
        }
        if request.age_group.is_some() {
            item.age_group = request.age_group;
        }
        if request.description.is_some() {
            item.description = request.description;
        }
        if let Some(images) = request.images {
            item.images = images;
        }
        if let Some(total_quantity) = request.total_quantity {
            item.total_quantity = total_quantity;
        }
        if let Some(quantity) = request.quantity {
            item.quantity = quantity;
        }
        match request.status {
            Some(ItemStatus::NotAvailable) => item.status = ItemStatus::NotAvailable,
            // Any other explicit status lifts the lock
            Some(_) => item.status = ItemStatus::Available,
            None => {}
        }
        inventory::normalize(&mut item);
        item.updated_at = self.clock.now();

        let committed = tx.count_committed(id).await?;
        if i64::from(item.total_quantity - item.quantity) != committed {
            tracing::warn!(
                item_id = %id,
                quantity = item.quantity,
                total_quantity = item.total_quantity,
                committed,
                "Item edit leaves the inventory ledger unbalanced"
            );
        }

        tx.update_item(&item).await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Delete an item. Refused while reservations still hold its stock unless `force` is set.
    pub async fn delete_item(&self, id: Uuid, force: bool) -> AppResult<()> {
        let committed = with_retries(self.max_retries, "delete_item", move || {
            self.try_delete_item(id, force)
        })
        .await?;

        if committed > 0 {
            tracing::warn!(item_id = %id, committed, "Item force-deleted with active reservations");
        } else {
            tracing::info!(item_id = %id, "Item deleted");
        }
        Ok(())
    }

    /// Returns how many reservations still held stock of the deleted item
    async fn try_delete_item(&self, id: Uuid, force: bool) -> AppResult<i64> {
        let mut tx = self.store.begin().await?;
        if tx.item(id).await?.is_none() {
            return Err(item_not_found(id));
        }

        let committed = tx.count_committed(id).await?;
        if committed > 0 && !force {
            return Err(AppError::BusinessRule(format!(
                "Item has {} active reservation(s); use force=true to delete anyway",
                committed
            )));
        }

        tx.delete_item(id).await?;
        tx.commit().await?;
        Ok(committed)
    }
}
