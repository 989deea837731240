pub mod app;
pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod library;
pub mod model;
pub mod queue;
pub mod ui;
