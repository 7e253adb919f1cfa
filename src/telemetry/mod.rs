//! # Telemetry Module
//!
//! Records rover telemetry to JSONL files with rotation.
//!
//! This module handles:
//! - Stamping telemetry samples with an RFC 3339 timestamp
//! - Formatting as JSONL (JSON Lines)
//! - Managing file rotation (max N records per file)
//! - Retaining only last M files

pub mod recorder;

pub use recorder::{TelemetryRecord, TelemetryRecorder};
