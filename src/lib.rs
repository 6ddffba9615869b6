pub mod app;
pub mod cli;
pub mod comfy;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod hub;
pub mod layout;
pub mod logging;
pub mod manifest;
pub mod output;
pub mod verify;
pub mod workflow;
