pub mod collector;
pub mod reporter;
