pub mod measures;
pub mod stats;
pub mod window;
