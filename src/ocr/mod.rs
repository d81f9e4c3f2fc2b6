pub mod client;
pub mod error;

pub use client::{OcrClient, TextExtractor};
pub use error::OcrError;
