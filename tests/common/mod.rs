#![allow(dead_code)]

pub mod mocks;
pub mod strategies;

pub use mocks::*;
#[allow(unused_imports)]
pub use strategies::*;
