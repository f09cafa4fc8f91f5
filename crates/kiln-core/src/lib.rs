#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod ffi_types;
pub mod host;
pub mod types;
