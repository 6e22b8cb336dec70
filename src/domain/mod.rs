// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and traits describing the captioning job:
// what a raw dataset row looks like, what an encoded sample
// looks like, and the error taxonomy of the pipeline.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Raw rows and encoded samples
pub mod sample;

// Typed pipeline errors (configuration / integrity / resize)
pub mod error;

// Seams that other layers implement
pub mod traits;
