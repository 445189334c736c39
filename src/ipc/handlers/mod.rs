pub mod core;
pub mod imports;
pub mod setup;
