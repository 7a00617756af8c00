// Library exports for moodsync - emotion capture and sync client

pub mod app;
pub mod backend;
pub mod camera;
pub mod capture;
pub mod cli;
pub mod config;
pub mod detector;
pub mod emotion;
pub mod error;
pub mod models;
pub mod mood;
pub mod overlay;
pub mod presentation;
pub mod reporter;
pub mod ui;
