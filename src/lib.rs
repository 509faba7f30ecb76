//! Asynchronous image-to-3D generation API
//!
//! Clients submit a prompt plus references to uploaded images and get a job
//! id back immediately. A pool of background workers removes the image
//! backgrounds, runs the generation model and stores the resulting GLB,
//! while clients poll the job's status.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
