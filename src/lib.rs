pub mod cli;
pub mod config;
pub mod engine;
pub mod metadata;
pub mod patterns;
pub mod pipeline;
pub mod report;
pub mod segment_plan;
pub mod util;

pub use pipeline::{Pipeline, extract_questions_from_pdf};
