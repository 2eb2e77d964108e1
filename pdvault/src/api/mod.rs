//! API layer for HTTP request handling and data models.
//!
//! This module contains the REST API implementation, organized into:
//!
//! - **[`handlers`]**: Axum route handlers for all account endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Account** (`/account`): Read and update the authenticated account
//! - **Password** (`/account/change-password`): Change the password with the
//!   personal token
//! - **Password reset** (`/account/request-password-reset`,
//!   `/account/reset-password`): Token-based reset flow for trusted apps
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with OpenAPI annotations using `utoipa`.
//! API documentation is available at `/docs` when the server is running.

pub mod handlers;
pub mod models;
