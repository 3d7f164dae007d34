// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod config;
pub mod errors;
pub mod api;
pub mod identity;
pub mod store;
pub mod events;
pub mod ledger;
pub mod decay;
pub mod hub;
pub mod server;
pub mod telemetry;
