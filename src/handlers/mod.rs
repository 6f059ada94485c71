pub mod config;
pub mod decoders;

pub use config::*;
pub use decoders::*;
