//! Runs domain - persisted crawler runs, parameter history, progress events.
//!
//! All SQL lives in `models/`; the kernel's run store delegates here.

pub mod models;
