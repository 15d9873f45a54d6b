
pub mod models;
pub mod logging;

// Provider abstraction: trait, response shapes, classified errors, cost
pub mod llm;

// Content quality judgment over extracted provider responses
pub mod validation;

// Sequential chapter generation with retry, backoff, and cancellation
pub mod generation;

// Chapter parsing, deduplication, integrity repair, final formatting
pub mod compiler;
