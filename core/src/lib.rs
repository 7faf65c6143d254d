pub mod config;
pub mod db;
pub mod error;
pub mod grams;
pub mod identity;
pub mod importer;
pub mod models;
pub mod normalize;
pub mod search;
pub mod service;
pub mod usda;
