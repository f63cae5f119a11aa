//! Domain entities, value objects and the ports the application layer talks to.

pub mod money;
pub mod order;
pub mod payment;
pub mod ports;
pub mod wallet;

pub type UserId = u64;
pub type OrderId = u64;
pub type RestaurantId = u64;
pub type TrainId = u64;
pub type FoodItemId = u64;
