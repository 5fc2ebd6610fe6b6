//! Whale Sentinel request protection agent.
//!
//! Wraps axum handlers with a policy pipeline driven by a per-agent profile
//! fetched from the Whale Sentinel gateway:
//!
//! ```text
//! request ─▶ buffer body ─▶ profile? ──none──▶ capture ─▶ persist (bg) ─▶ handler
//!                              │
//!                              ▼
//!                handler ─▶ rate limit ─▶ mode dispatch ─▶ block (403)
//!                                              │
//!                                              ▼
//!                                  secure response headers ─▶ response
//! ```
//!
//! Persistence and lite-mode synchronization run on a bounded background
//! queue; detection is awaited because it gates the block decision.

pub mod agent;
pub mod config;
pub mod error;
pub mod models;
pub mod protection;
pub mod storage;

pub use error::{AgentError, AgentResult};
pub use protection::pipeline::{protect, Collaborators, ProtectionPipeline};
