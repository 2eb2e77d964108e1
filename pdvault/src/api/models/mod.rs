//! API request/response models.

pub mod account;
