// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - component state and backend clients.

pub mod bot_check;
pub mod client;
pub mod coupon_history;
pub mod gate;
pub mod identity;
pub mod phone;
pub mod phone_auth;
pub mod profile_form;
pub mod profile_store;
pub mod session;

pub use client::{ClientApp, ClientRegistry, ClientSettings};
pub use coupon_history::CouponHistoryPanel;
pub use identity::{IdentityApi, IdentityToolkit, MockIdentity};
pub use profile_store::UserProfileStore;
pub use session::{AuthHandle, IdentityContext};
