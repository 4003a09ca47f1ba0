//! Integration test suite for relogin.
//!
//! These tests drive whole workflows through `ReloginService` against an
//! in-process fake panel and a SQLite binding store in a temp directory.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: Happy path, staleness law and key reuse
//! - `timeouts`: QR-wait and auth-wait deadlines
//! - `signals`: Continue and cancel semantics in every waiting state
//! - `concurrency`: Claim exclusivity and independent keys
//! - `server`: WebSocket round trips against a live listener
//!
//! All workflow tests except `server` run on tokio's paused clock, so the
//! 60s and 200s deadlines elapse instantly and deterministically.


mod concurrency;
mod signals;
mod workflow_e2e;
