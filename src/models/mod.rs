// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod coupon;
pub mod session;
pub mod user;

pub use coupon::{sort_newest_first, CouponDoc, CouponHistoryEntry, CreatedValue};
pub use session::Session;
pub use user::{AuthUser, ProfileFields, ProfileWrite, UserProfile};
