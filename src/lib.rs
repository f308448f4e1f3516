//! Price tracker
//!
//! Watches a folder for game-market screenshots (or text dumps), extracts
//! `{name, category, price}` records with an LLM and appends them to a price
//! history store.
//!
//! # Modules
//!
//! - [`config`]: layered configuration (defaults, file, environment, CLI)
//! - [`llm`]: Chat Completions client used by the extraction providers
//! - [`telemetry`]: tracing subscriber setup
//! - [`tracker`]: the ingestion pipeline itself

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod llm;
pub mod telemetry;
pub mod tracker;
