//! Capture Bridge - live HTTP capture ingestion and query service
//!
//! An intercepting proxy pushes every completed HTTP exchange to the bridge.
//! The bridge normalizes the payload, scores it against any external threat
//! annotation and keeps it in bounded in-memory history that can be queried
//! while traffic is still flowing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   POST /live-session    ┌─────────────────────────┐
//! │  Intercepting proxy  │ ──────────────────────▶ │        HTTP API         │
//! └──────────────────────┘                         └────────────┬────────────┘
//!                                                               │
//!                                   ┌───────────────────────────▼───────────┐
//!                                   │             CaptureBridge             │
//!                                   │  normalize ─▶ classify ─▶ store       │
//!                                   │                                       │
//!                                   │  ┌──────────────┐  ┌───────────────┐  │
//!                                   │  │ live buffer  │  │ flagged buffer│  │
//!                                   │  └──────┬───────┘  └───────┬───────┘  │
//!                                   │         └──── snapshot ────┘          │
//!                                   │   query · timeline · extract · export │
//!                                   └───────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`session`]: Canonical records, normalization and the bounded store
//! - [`risk`]: Risk scoring, annotation analysis and threat hunting rules
//! - [`query`]: Filtered search, statistics and timeline aggregation
//! - [`extract`]: Budgeted evidence extraction from large bodies
//! - [`bridge`]: The [`CaptureBridge`] facade and its response views
//! - [`api`]: axum router exposing the bridge over HTTP
//! - [`config`]: Configuration management

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod extract;
pub mod query;
pub mod risk;
pub mod session;

pub use bridge::CaptureBridge;
pub use config::BridgeConfig;
pub use error::{Error, Result};
