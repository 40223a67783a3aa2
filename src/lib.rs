pub mod bootstrap;
pub mod case;
pub mod config;
pub mod orchestration;
pub mod shared;
pub mod steps;
pub mod store;
pub mod workflows;
