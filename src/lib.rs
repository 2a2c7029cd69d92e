pub mod catalog;
pub mod collection;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod osu;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod storage;
