//! Common types used across the application.

pub mod id;
pub mod money;
pub mod pagination;

pub use id::*;
pub use money::{
    MAX_STORABLE_AMOUNT, MONEY_SCALE, RECONCILE_TOLERANCE, has_money_scale, is_storable,
};
pub use pagination::{PageMeta, PageRequest, PageResponse};
