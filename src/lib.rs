pub mod cli;
pub mod config;
pub mod inference;
pub mod pipeline;
pub mod query;
pub mod source;
pub mod storage;
pub mod web;
pub mod window;
