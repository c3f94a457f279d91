pub mod config;
pub mod errors;
pub mod io;
pub mod state;
