#![doc = include_str!("../README.md")]

pub mod cache;
pub mod calibrate;
pub mod compile;
pub mod ep_context;
pub mod execute;
pub mod profile;
pub mod provider;
pub mod refit;
pub mod state;

pub use provider::{CopyRequest, NodeComputeInfo, ProviderHooks, TensorrtExecutionProvider};
