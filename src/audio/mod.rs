pub mod convolver;
pub mod decoder;
pub mod engine;
pub mod extractor;
pub mod graph;
pub mod reverb;
pub mod stretcher;
pub mod types;
