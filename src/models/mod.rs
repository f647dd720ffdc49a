pub mod dsl_model;
pub mod metrics;
pub mod request;
pub mod stage;
pub mod threshold;
