//! Product catalog
//!
//! Visibility rules:
//! - a product with no stock is never public; selling out demotes it to
//!   `owner_admin` and restocking republishes it
//! - owners choose between `all` and `owner_admin`; only administrators
//!   set `admin_only`, which hides the product and resolves its orders
//! - deleting a product resolves its orders

use crate::{
    engine::Marketplace,
    resolver::{ResolutionTrigger, SettlementResolver},
    types::{Actor, NewProduct, ProductOutcome, ProductUpdate, Resolution},
    Error, Result,
};
use chrono::Utc;
use ledger_core::{AuditRecord, HideReason, Product, Visibility, MAX_AMOUNT};
use message_bus::NotificationKind;
use uuid::Uuid;

/// Longest product title, in characters
pub const MAX_TITLE: usize = 255;

impl Marketplace {
    /// List a new product owned by the caller
    pub fn create_product(&self, actor: &Actor, request: &NewProduct) -> Result<Product> {
        let title = validate_title(&request.title)?;
        validate_price(request.price)?;
        if request.visibility == Visibility::AdminOnly {
            return Err(Error::Forbidden(
                "Only administrators can set admin_only visibility".into(),
            ));
        }
        self.check_account(actor.user_id)?;

        let product = self.run("create_product", |scope| {
            let owner = scope.require_active(actor)?;
            let now = Utc::now();

            let mut product = Product {
                id: Uuid::now_v7(),
                owner_id: owner.id,
                title: title.clone(),
                price: request.price,
                stock: request.stock,
                visibility: request.visibility,
                hidden_by: None,
                deleted_at: None,
                created_at: now,
                updated_at: now,
            };
            if product.stock == 0 && product.visibility == Visibility::All {
                product.visibility = Visibility::OwnerAdmin;
                product.hidden_by = Some(HideReason::SoldOut);
            }

            scope.txn().insert_product(&product)?;
            Ok(product)
        })?;

        tracing::info!(
            product_id = %product.id,
            owner_id = %product.owner_id,
            price = product.price,
            stock = product.stock,
            "Product created"
        );
        Ok(product)
    }

    /// Owner edits a product
    pub fn update_product(
        &self,
        actor: &Actor,
        product_id: Uuid,
        update: &ProductUpdate,
    ) -> Result<Product> {
        validate_update(update)?;
        if update.visibility == Some(Visibility::AdminOnly) {
            return Err(Error::Forbidden(
                "Only administrators can set admin_only visibility".into(),
            ));
        }
        self.check_account(actor.user_id)?;

        self.run("update_product", |scope| {
            scope.require_active(actor)?;
            let txn = scope.txn();

            let mut product = txn.lock_product(product_id)?;
            if product.owner_id != actor.user_id {
                return Err(Error::Forbidden(format!(
                    "Only the owner can edit product {}",
                    product_id
                )));
            }
            if product.deleted_at.is_some() {
                return Err(Error::NotFound(format!("Product {}", product_id)));
            }
            if product.visibility == Visibility::AdminOnly {
                return Err(Error::Forbidden(format!(
                    "Product {} was hidden by an administrator",
                    product_id
                )));
            }

            apply_update(&mut product, update)?;
            txn.put_product(&product)?;
            Ok(product)
        })
    }

    /// Administrator edits a product. Moving it to `admin_only` resolves its
    /// in-flight orders.
    pub fn admin_update_product(
        &self,
        admin: &Actor,
        product_id: Uuid,
        update: &ProductUpdate,
    ) -> Result<ProductOutcome> {
        validate_update(update)?;
        self.check_account(admin.user_id)?;

        let outcome = self.run("admin_update_product", |scope| {
            scope.require_admin(admin)?;
            let txn = scope.txn();

            let mut product = txn.lock_product(product_id)?;
            if product.deleted_at.is_some() {
                return Err(Error::NotFound(format!("Product {}", product_id)));
            }
            let hiding = update.visibility == Some(Visibility::AdminOnly)
                && product.visibility != Visibility::AdminOnly;

            apply_update(&mut product, update)?;
            txn.put_product(&product)?;

            let resolution = if hiding {
                SettlementResolver::resolve(scope, &[product_id], ResolutionTrigger::ProductHidden)?
            } else {
                Resolution::default()
            };

            txn.append_audit(
                &AuditRecord::new(admin.user_id, "admin_update_product", product_id)
                    .with("product_title", &product.title)
                    .with("visibility", format!("{:?}", product.visibility))
                    .with("stock", product.stock)
                    .with("price", product.price)
                    .with("orders_cancelled", resolution.cancelled.len())
                    .with("orders_settled", resolution.settled.len()),
            )?;

            if hiding {
                scope.notify(
                    product.owner_id,
                    NotificationKind::Sale,
                    format!("Your product '{}' was hidden by an administrator", product.title),
                    Some(product_id),
                );
            }

            Ok(ProductOutcome {
                product: txn.lock_product(product_id)?,
                applied: true,
                resolution,
            })
        })?;

        tracing::info!(
            product_id = %product_id,
            admin_id = %admin.user_id,
            cancelled = outcome.resolution.cancelled.len(),
            settled = outcome.resolution.settled.len(),
            "Product updated by administrator"
        );
        Ok(outcome)
    }

    /// Soft-delete a product (owner or administrator) and resolve its orders
    pub fn delete_product(&self, actor: &Actor, product_id: Uuid) -> Result<ProductOutcome> {
        self.check_account(actor.user_id)?;

        let outcome = self.run("delete_product", |scope| {
            scope.require_active(actor)?;
            let txn = scope.txn();

            let mut product = txn.lock_product(product_id)?;
            let by_owner = product.owner_id == actor.user_id;
            if !by_owner && !actor.is_admin() {
                return Err(Error::Forbidden(format!(
                    "Only the owner or an administrator can delete product {}",
                    product_id
                )));
            }
            if product.deleted_at.is_some() {
                return Ok(ProductOutcome {
                    product,
                    applied: false,
                    resolution: Resolution::default(),
                });
            }

            let now = Utc::now();
            product.deleted_at = Some(now);
            product.visibility = Visibility::OwnerAdmin;
            product.hidden_by = None;
            product.updated_at = now;
            txn.put_product(&product)?;

            let resolution =
                SettlementResolver::resolve(scope, &[product_id], ResolutionTrigger::ProductDeleted)?;

            if !by_owner {
                txn.append_audit(
                    &AuditRecord::new(actor.user_id, "delete_product", product_id)
                        .with("product_title", &product.title)
                        .with("orders_cancelled", resolution.cancelled.len())
                        .with("orders_settled", resolution.settled.len()),
                )?;
                scope.notify(
                    product.owner_id,
                    NotificationKind::Sale,
                    format!("Your product '{}' was removed by an administrator", product.title),
                    Some(product_id),
                );
            }

            Ok(ProductOutcome {
                product: txn.lock_product(product_id)?,
                applied: true,
                resolution,
            })
        })?;

        if outcome.applied {
            tracing::info!(
                product_id = %product_id,
                actor_id = %actor.user_id,
                cancelled = outcome.resolution.cancelled.len(),
                settled = outcome.resolution.settled.len(),
                "Product deleted"
            );
        }
        Ok(outcome)
    }
}

/// Apply an update, keeping `stock == 0 => not public`
fn apply_update(product: &mut Product, update: &ProductUpdate) -> Result<()> {
    if let Some(title) = &update.title {
        product.title = validate_title(title)?;
    }
    if let Some(price) = update.price {
        product.price = price;
    }
    if let Some(stock) = update.stock {
        product.stock = stock;
    }

    match update.visibility {
        Some(Visibility::All) if product.stock == 0 => {
            return Err(Error::Validation(
                "A product without stock cannot be public".into(),
            ));
        }
        Some(visibility) => {
            product.visibility = visibility;
            product.hidden_by = None;
        }
        None if update.stock.is_some() => {
            if product.stock == 0 && product.visibility == Visibility::All {
                product.visibility = Visibility::OwnerAdmin;
                product.hidden_by = Some(HideReason::SoldOut);
            } else if product.stock > 0 && product.hidden_by == Some(HideReason::SoldOut) {
                product.visibility = Visibility::All;
                product.hidden_by = None;
            }
        }
        None => {}
    }

    product.updated_at = Utc::now();
    Ok(())
}

fn validate_update(update: &ProductUpdate) -> Result<()> {
    if update == &ProductUpdate::default() {
        return Err(Error::Validation("No fields to update".into()));
    }
    if let Some(title) = &update.title {
        validate_title(title)?;
    }
    if let Some(price) = update.price {
        validate_price(price)?;
    }
    Ok(())
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE {
        return Err(Error::Validation(format!(
            "Title must be between 1 and {} characters",
            MAX_TITLE
        )));
    }
    Ok(title.to_string())
}

fn validate_price(price: u64) -> Result<()> {
    if price == 0 {
        return Err(Error::Validation("Price must be positive".into()));
    }
    if price > MAX_AMOUNT {
        return Err(Error::Validation(format!(
            "Price must not exceed {}",
            MAX_AMOUNT
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: u32, visibility: Visibility) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            title: "Desk lamp".to_string(),
            price: 25_000,
            stock,
            visibility,
            hidden_by: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_stock_to_zero_demotes() {
        let mut p = product(3, Visibility::All);
        apply_update(
            &mut p,
            &ProductUpdate {
                stock: Some(0),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(p.visibility, Visibility::OwnerAdmin);
        assert_eq!(p.hidden_by, Some(HideReason::SoldOut));
    }

    #[test]
    fn test_restock_republishes_only_sold_out() {
        let mut sold_out = product(1, Visibility::All);
        assert!(sold_out.take_stock(1));
        apply_update(
            &mut sold_out,
            &ProductUpdate {
                stock: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(sold_out.visibility, Visibility::All);

        let mut private = product(0, Visibility::OwnerAdmin);
        apply_update(
            &mut private,
            &ProductUpdate {
                stock: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(private.visibility, Visibility::OwnerAdmin);
    }

    #[test]
    fn test_public_without_stock_rejected() {
        let mut p = product(0, Visibility::OwnerAdmin);
        let err = apply_update(
            &mut p,
            &ProductUpdate {
                visibility: Some(Visibility::All),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_update_validation() {
        assert!(validate_update(&ProductUpdate::default()).is_err());
        assert!(validate_update(&ProductUpdate {
            price: Some(0),
            ..Default::default()
        })
        .is_err());
        assert!(validate_update(&ProductUpdate {
            title: Some("   ".into()),
            ..Default::default()
        })
        .is_err());
        assert!(validate_title(&"t".repeat(256)).is_err());
    }
}
