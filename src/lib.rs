pub mod assets;
pub mod backend;
pub mod config;
pub mod display;
pub mod frame;
pub mod pipeline;
pub mod relay;
pub mod tls;
pub mod utils;
