//! FLUX batch image generation
//!
//! A resilient client for the BFL FLUX image-editing API (submit, poll,
//! download) and an orchestrator that renders a reference image across a
//! matrix of styles, aspect ratios and quality presets.

pub mod app_state;
pub mod config;
pub mod models;
pub mod services;
