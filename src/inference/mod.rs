pub mod client;
pub mod error;
pub mod types;

pub use client::{InferenceClient, ModelInvoker};
pub use error::InferenceError;
pub use types::{InferenceRequest, InferenceResponse, Message, Usage};
