// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Hive Coupons: phone sign-in, a one-time Hive ID, and a live coupon history.
//!
//! This crate provides the backend-for-frontend that drives the web page.
//! Identity is delegated to Firebase Identity Toolkit and data lives in
//! Firestore; both sit behind traits so the app also runs fully in memory.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::DocumentStore;
use services::{ClientRegistry, IdentityApi};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub identity: Arc<dyn IdentityApi>,
    pub db: Arc<dyn DocumentStore>,
    pub clients: ClientRegistry,
}

impl AppState {
    pub fn new(config: Config, identity: Arc<dyn IdentityApi>, db: Arc<dyn DocumentStore>) -> Self {
        let clients = ClientRegistry::with_max_clients(config.session_max_clients);
        Self {
            config,
            identity,
            db,
            clients,
        }
    }
}
