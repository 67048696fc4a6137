#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cache;
pub mod dynamic;
mod index;
mod writeback;

#[cfg(test)]
mod tests;

pub use self::{
    cache::PolicyCache,
    dynamic::{DynamicCache, DynamicIndex, SharedDynamicIndex},
    index::{Index, SharedIndex},
    writeback::{Controller, Update},
};
