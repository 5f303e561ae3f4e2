#![allow(dead_code)]

pub mod frames;
pub mod gesturelab_env;
