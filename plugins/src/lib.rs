pub mod backend;
pub mod factory;
pub mod reclaim;
pub mod services;
pub mod strategies;
