// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! RPA4YOU: personal assistant core
//!
//! A local-model chat, a photo sorter that detects people, and the
//! single-slot task runner both use to keep slow work off the UI thread.

pub mod config;
pub mod conversation;
pub mod detection;
pub mod error;
pub mod ollama;
pub mod sort;
pub mod tabs;
pub mod task;

pub use config::AppConfig;
pub use error::{AssistantError, Result};
