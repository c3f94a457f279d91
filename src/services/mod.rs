pub mod analysis;
pub mod artist;
pub mod backend;
pub mod editing;
pub mod executor;
pub mod gemini;
pub mod keys;
pub mod lettering;
pub mod observer;
pub mod pipeline;
pub mod project;
pub mod script;

#[cfg(test)]
pub(crate) mod mock;
