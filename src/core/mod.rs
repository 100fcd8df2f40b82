pub mod adapter;
pub mod catalog;
pub mod checker;
pub mod domain;
pub mod errors;
pub mod languages;
pub mod output;
pub mod pipeline;
pub mod profile;
pub mod traits;
