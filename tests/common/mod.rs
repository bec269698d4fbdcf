//! Common test infrastructure
//!
//! Tests build a [`TestEngine`]: a real SQLite job store, worker pool,
//! scheduler and service around a scripted check client and a manual clock.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use adwatch_server::Device;
//! use common::TestEngine;
//!
//! #[tokio::test]
//! async fn test_scheduled_job() {
//!     let engine = TestEngine::spawn();
//!     engine.client.script("shoes", vec![Ok(2)]);
//!     let job = engine.service.create_job("shoes", None, Device::Desktop, 5).unwrap();
//!     engine.tick();
//!     let job = engine.wait_until_finished(job.id).await;
//! }
//! ```

mod engine;
mod fake_client;

pub use engine::{start_time, TestEngine};
pub use fake_client::{RecordingNotifier, ScriptedClient};
