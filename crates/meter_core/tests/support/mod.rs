#![allow(dead_code)]

pub mod meter;
pub mod stores;
