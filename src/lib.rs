pub mod app;
pub mod config;
pub mod utils;

pub use app::App;
pub use config::Config;
