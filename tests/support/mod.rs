#![allow(dead_code)]

pub mod fake_chain;
pub mod fixtures;
pub mod wait;
