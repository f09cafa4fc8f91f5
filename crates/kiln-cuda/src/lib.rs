#![doc = include_str!("../README.md")]

pub mod cast;
pub mod graph;
pub mod memory;
pub mod stream;
pub mod sys;
