//! Core types for the Assistive Store cart.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod action;
pub mod cart;
pub mod id;
pub mod price;

pub use action::{CartAction, CartMutation, PendingAction};
pub use cart::{Cart, CartItem, ProductDetails};
pub use id::*;
pub use price::{CurrencyCode, Price};
