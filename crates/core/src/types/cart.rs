//! Cart lines and the cart aggregate.
//!
//! A [`Cart`] is an ordered list of [`CartItem`]s with at most one line per
//! product. Every mutator on `Cart` preserves that invariant; callers never
//! touch the underlying `Vec` directly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::ProductId;

/// Product snapshot captured when a product is added to the cart.
///
/// These values are denormalized onto the cart line and may go stale
/// relative to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetails {
    pub name: String,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Maximum purchasable quantity known at snapshot time.
    pub stock: u32,
}

/// One product line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub name: String,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub stock: u32,
}

impl CartItem {
    /// Create a cart line from a product snapshot.
    #[must_use]
    pub fn new(product_id: ProductId, quantity: u32, details: &ProductDetails) -> Self {
        Self {
            product_id,
            quantity,
            name: details.name.clone(),
            price: details.price,
            image: details.image.clone(),
            stock: details.stock,
        }
    }

    /// The product snapshot carried by this line.
    #[must_use]
    pub fn details(&self) -> ProductDetails {
        ProductDetails {
            name: self.name.clone(),
            price: self.price,
            image: self.image.clone(),
            stock: self.stock,
        }
    }

    /// Price of the whole line (`price * quantity`).
    ///
    /// Saturates at the `Decimal` bounds instead of overflowing.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.price.saturating_mul(Decimal::from(self.quantity))
    }

    /// Copy of this line with the name and image reference truncated.
    ///
    /// Lengths are counted in characters, not bytes.
    #[must_use]
    pub fn reduced(&self, max_name_chars: usize, max_image_chars: usize) -> Self {
        Self {
            name: self.name.chars().take(max_name_chars).collect(),
            image: self
                .image
                .as_ref()
                .map(|image| image.chars().take(max_image_chars).collect()),
            ..self.clone()
        }
    }
}

/// Ordered list of cart lines, unique by product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Create an empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Build a cart from untrusted lines.
    ///
    /// Duplicate product lines collapse into one, keeping the larger quantity.
    #[must_use]
    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for item in items {
            cart.upsert_larger(item);
        }
        cart
    }

    /// Merge a locally persisted cart with a remote-sourced one.
    ///
    /// Lines present on both sides keep the larger quantity (and that side's
    /// snapshot); lines present on one side only are carried over unchanged.
    /// Remote order comes first, followed by local-only lines.
    #[must_use]
    pub fn merge_larger(local: &Self, remote: &Self) -> Self {
        let mut merged = remote.clone();
        for item in &local.items {
            merged.upsert_larger(item.clone());
        }
        merged
    }

    fn upsert_larger(&mut self, item: CartItem) {
        match self.position(&item.product_id) {
            Some(idx) => {
                if let Some(existing) = self.items.get_mut(idx)
                    && item.quantity > existing.quantity
                {
                    *existing = item;
                }
            }
            None => self.items.push(item),
        }
    }

    /// All lines in cart order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Consume the cart and return its lines.
    #[must_use]
    pub fn into_items(self) -> Vec<CartItem> {
        self.items
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up the line for a product.
    #[must_use]
    pub fn get(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.product_id == product_id)
    }

    /// Index of the line for a product.
    #[must_use]
    pub fn position(&self, product_id: &ProductId) -> Option<usize> {
        self.items
            .iter()
            .position(|item| &item.product_id == product_id)
    }

    /// Quantity currently held for a product (0 when absent).
    #[must_use]
    pub fn quantity_of(&self, product_id: &ProductId) -> u32 {
        self.get(product_id).map_or(0, |item| item.quantity)
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.items
            .iter()
            .fold(0_u32, |acc, item| acc.saturating_add(item.quantity))
    }

    /// Sum of all line totals, saturating like [`CartItem::line_total`].
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.items
            .iter()
            .fold(Decimal::ZERO, |acc, item| acc.saturating_add(item.line_total()))
    }

    /// Replace the line for `item.product_id`, or append it.
    pub fn upsert(&mut self, item: CartItem) {
        match self.position(&item.product_id) {
            Some(idx) => {
                if let Some(existing) = self.items.get_mut(idx) {
                    *existing = item;
                }
            }
            None => self.items.push(item),
        }
    }

    /// Set the quantity of an existing line, returning the previous quantity.
    pub fn set_quantity(&mut self, product_id: &ProductId, quantity: u32) -> Option<u32> {
        let item = self
            .items
            .iter_mut()
            .find(|item| &item.product_id == product_id)?;
        Some(std::mem::replace(&mut item.quantity, quantity))
    }

    /// Remove the line for a product, returning it with its former position.
    pub fn remove(&mut self, product_id: &ProductId) -> Option<(usize, CartItem)> {
        let idx = self.position(product_id)?;
        Some((idx, self.items.remove(idx)))
    }

    /// Restore a product's line to an earlier snapshot.
    ///
    /// `Some((position, item))` puts the line back at its former position
    /// (replacing whatever line the product has now); `None` means the
    /// product had no line, so any current line is dropped.
    pub fn restore(&mut self, product_id: &ProductId, prior: Option<(usize, CartItem)>) {
        self.remove(product_id);
        if let Some((idx, item)) = prior {
            let idx = idx.min(self.items.len());
            self.items.insert(idx, item);
        }
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl From<Vec<CartItem>> for Cart {
    fn from(items: Vec<CartItem>) -> Self {
        Self::from_items(items)
    }
}
