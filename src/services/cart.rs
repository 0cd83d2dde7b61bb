use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::db::UnitOfWork;
use crate::entities::{cart_item, product};
use crate::errors::ServiceError;
use crate::repositories::CartRepository;

/// One priced cart line as shown to the shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub slug: String,
    pub amount_cents: i64,
    pub have_stock: bool,
    pub main_image_key: String,
    pub quantity: i32,
    pub line_total_cents: i64,
}

/// Point-in-time view of a cart priced against live products.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CartSnapshot {
    pub items: Vec<CartLine>,
    pub total_amount_cents: i64,
    pub total_quantity: i64,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddCartItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateCartItem {
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

/// Pairs each cart line with its product. A line whose product row is gone
/// is a data-integrity failure.
pub(crate) fn join_products(
    lines: Vec<(cart_item::Model, Option<product::Model>)>,
) -> Result<Vec<(cart_item::Model, product::Model)>, ServiceError> {
    lines
        .into_iter()
        .map(|(item, product)| {
            product.map(|p| (item.clone(), p)).ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", item.product_id))
            })
        })
        .collect()
}

pub(crate) fn cart_total(lines: &[(cart_item::Model, product::Model)]) -> i64 {
    lines.iter().fold(0i64, |acc, (item, product)| {
        acc.saturating_add(product.amount_cents.saturating_mul(i64::from(item.quantity)))
    })
}

/// Builds the shopper-facing snapshot. Every product must carry a main image.
pub(crate) fn build_snapshot(
    lines: Vec<(cart_item::Model, product::Model)>,
) -> Result<CartSnapshot, ServiceError> {
    let total_amount_cents = cart_total(&lines);
    let total_quantity = lines
        .iter()
        .map(|(item, _)| i64::from(item.quantity))
        .sum();

    let items = lines
        .into_iter()
        .map(|(item, product)| {
            let main_image_key = product.main_image_key.clone().ok_or_else(|| {
                ServiceError::NotFound(format!("Image for product {} not found", product.slug))
            })?;
            Ok(CartLine {
                item_id: item.id,
                product_id: product.id,
                line_total_cents: product
                    .amount_cents
                    .saturating_mul(i64::from(item.quantity)),
                name: product.name,
                slug: product.slug,
                amount_cents: product.amount_cents,
                have_stock: product.stock > 0,
                main_image_key,
                quantity: item.quantity,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    Ok(CartSnapshot {
        items,
        total_amount_cents,
        total_quantity,
    })
}

/// Cart reads and mutations. Stock checks here are advisory; the
/// reservation at order creation is the one that counts.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Reads the cart without locking anything. An empty cart is a valid
    /// result.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, user_id: Uuid) -> Result<CartSnapshot, ServiceError> {
        let lines = CartRepository::new(self.db.as_ref())
            .lines_with_products(user_id)
            .await?;
        build_snapshot(join_products(lines)?)
    }

    /// Adds `quantity` units, merging into an existing line for the product.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddCartItem,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let uow = UnitOfWork::begin(&self.db).await?;
        let result = Self::add_item_in(&uow, user_id, input).await;
        uow.finish(result).await
    }

    async fn add_item_in(
        uow: &UnitOfWork,
        user_id: Uuid,
        input: AddCartItem,
    ) -> Result<cart_item::Model, ServiceError> {
        let product = uow
            .products()
            .find(input.product_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

        let carts = uow.carts();
        let existing = carts.find_line(user_id, input.product_id).await?;
        let wanted = existing
            .as_ref()
            .map(|line| line.quantity)
            .unwrap_or(0)
            .saturating_add(input.quantity);

        if product.stock < wanted {
            return Err(ServiceError::InsufficientStock(format!(
                "Only {} units of {} available",
                product.stock, product.slug
            )));
        }

        let line = match existing {
            Some(line) => carts.set_quantity(line, wanted).await?,
            None => carts.insert(user_id, input.product_id, wanted).await?,
        };

        info!(user_id = %user_id, product_id = %input.product_id, quantity = wanted, "cart line saved");
        Ok(line)
    }

    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        user_id: Uuid,
        item_id: Uuid,
        input: UpdateCartItem,
    ) -> Result<cart_item::Model, ServiceError> {
        input.validate()?;

        let uow = UnitOfWork::begin(&self.db).await?;
        let result: Result<_, ServiceError> = async {
            let item = owned_line(&uow, user_id, item_id).await?;
            let product = uow
                .products()
                .find(item.product_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Product not found".to_string()))?;

            if product.stock < input.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "Only {} units of {} available",
                    product.stock, product.slug
                )));
            }

            Ok(uow.carts().set_quantity(item, input.quantity).await?)
        }
        .await;
        uow.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<(), ServiceError> {
        let uow = UnitOfWork::begin(&self.db).await?;
        let result: Result<_, ServiceError> = async {
            let item = owned_line(&uow, user_id, item_id).await?;
            uow.carts().delete(item.id).await?;
            Ok(())
        }
        .await;
        uow.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        Ok(CartRepository::new(self.db.as_ref()).clear(user_id).await?)
    }
}

async fn owned_line(
    uow: &UnitOfWork,
    user_id: Uuid,
    item_id: Uuid,
) -> Result<cart_item::Model, ServiceError> {
    let item = uow
        .carts()
        .find(item_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Cart item not found".to_string()))?;

    if item.user_id != user_id {
        return Err(ServiceError::Forbidden(
            "Cart item belongs to another user".to_string(),
        ));
    }
    Ok(item)
}
