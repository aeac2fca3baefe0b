pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod fairness;
pub mod limits;
pub mod model;
pub mod observability;
pub mod quota;
pub mod repository;
pub mod resolver;
pub mod rules;
pub mod wal;
