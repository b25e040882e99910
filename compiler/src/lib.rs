// fxc — Effect graph compiler
//
// Library root. Graph model and block registry first, then the passes in
// the order the pipeline runs them.

pub mod alloc;
pub mod blocks;
pub mod config;
pub mod diag;
pub mod dot;
pub mod emit;
pub mod encoder;
pub mod graph;
pub mod ir;
pub mod optimize;
pub mod pass;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod template;
pub mod units;
pub mod validate;
