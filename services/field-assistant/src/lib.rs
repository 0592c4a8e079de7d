pub mod camera;
pub mod config;
pub mod devices;
pub mod gemini_adapter;
