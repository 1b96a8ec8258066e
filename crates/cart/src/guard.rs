//! Stock enforcement.
//!
//! Pure checks consulted before every cart mutation. A quantity is valid
//! when it lies in `1..=stock`, where `stock` is the last-known ceiling
//! snapshotted on the cart line (it may be stale; checkout is the final
//! authority).

use crate::error::{CartError, Result};

/// Whether `quantity` is an acceptable line quantity under `stock`.
#[must_use]
pub const fn within_ceiling(quantity: u32, stock: u32) -> bool {
    quantity >= 1 && quantity <= stock
}

/// How many more units fit under `stock` given `current` in the cart.
#[must_use]
pub const fn max_addable(current: u32, stock: u32) -> u32 {
    stock.saturating_sub(current)
}

/// Clamp a quantity to the stock ceiling.
#[must_use]
pub fn cap(quantity: u32, stock: u32) -> u32 {
    quantity.min(stock)
}

/// Validate adding `delta` units on top of `current`, returning the new total.
///
/// # Errors
///
/// - `StockExceeded` (with the remaining capacity) if the total would exceed
///   `stock`
/// - `InvalidQuantity` if `delta` or the total is zero
pub fn check_add(current: u32, delta: u32, stock: u32) -> Result<u32> {
    let Some(total) = current.checked_add(delta).filter(|total| *total <= stock) else {
        return Err(CartError::StockExceeded {
            requested: delta,
            available: max_addable(current, stock),
        });
    };
    if delta == 0 || total == 0 {
        return Err(CartError::InvalidQuantity);
    }
    Ok(total)
}

/// Validate setting a line to an absolute `quantity`.
///
/// # Errors
///
/// - `StockExceeded` if `quantity` exceeds `stock` (no clamping)
/// - `InvalidQuantity` if `quantity` is zero
pub fn check_set(quantity: u32, stock: u32) -> Result<u32> {
    if quantity > stock {
        return Err(CartError::StockExceeded {
            requested: quantity,
            available: stock,
        });
    }
    if quantity == 0 {
        return Err(CartError::InvalidQuantity);
    }
    Ok(quantity)
}
