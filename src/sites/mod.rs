//! Built-in site definitions.

pub mod ttg;
