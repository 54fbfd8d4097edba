//! Test infrastructure shared by the backend integration suites.

#![allow(dead_code)]

pub mod fixtures;

pub use fixtures::*;
