//! sagepipe - declarative ML pipeline graphs for SageMaker Pipelines and Step Functions

pub mod backends;
pub mod cli;
pub mod config;
pub mod dag;
pub mod encoding;
pub mod error;
pub mod images;
pub mod logging;
pub mod models;
pub mod notifier;
pub mod parser;
pub mod pipeline;
pub mod runner;
pub mod workflow;
