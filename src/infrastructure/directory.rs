//! In-memory stand-ins for the catalog and identity collaborators.

use crate::domain::money::Amount;
use crate::domain::order::ActorRole;
use crate::domain::ports::{Catalog, FoodItemPrice, IdentityDirectory};
use crate::domain::{FoodItemId, RestaurantId, UserId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct CatalogData {
    restaurants: HashMap<RestaurantId, UserId>,
    items: HashMap<FoodItemId, FoodItemPrice>,
}

/// A mutable in-memory catalog. Prices can change at any time; orders keep
/// the price they were created with.
#[derive(Default, Clone)]
pub struct StaticCatalog {
    data: Arc<RwLock<CatalogData>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_restaurant(&self, restaurant_id: RestaurantId, owner_id: UserId) {
        let mut data = self.data.write().await;
        data.restaurants.insert(restaurant_id, owner_id);
    }

    pub async fn set_item(
        &self,
        item_id: FoodItemId,
        restaurant_id: RestaurantId,
        price: Amount,
        available: bool,
    ) {
        let mut data = self.data.write().await;
        data.items.insert(
            item_id,
            FoodItemPrice {
                restaurant_id,
                price,
                available,
            },
        );
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn food_item_price(&self, item_id: FoodItemId) -> Result<Option<FoodItemPrice>> {
        let data = self.data.read().await;
        Ok(data.items.get(&item_id).cloned())
    }

    async fn restaurant_owner(&self, restaurant_id: RestaurantId) -> Result<Option<UserId>> {
        let data = self.data.read().await;
        Ok(data.restaurants.get(&restaurant_id).copied())
    }
}

#[derive(Default, Clone)]
pub struct StaticDirectory {
    roles: Arc<RwLock<HashMap<UserId, ActorRole>>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: UserId, role: ActorRole) {
        let mut roles = self.roles.write().await;
        roles.insert(user_id, role);
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn resolve_actor_role(&self, user_id: UserId) -> Result<Option<ActorRole>> {
        let roles = self.roles.read().await;
        Ok(roles.get(&user_id).copied())
    }
}
