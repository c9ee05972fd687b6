//! Types library for the market-data caching engine
//!
//! Core value types shared by the tick store, bar aggregator and sector
//! aggregation cache. Keeping them here makes the arithmetic rules
//! (fixed-point decimals, 2-dp half-up rounding) identical everywhere.
//!
//! # Modules
//! - `ids`: Instrument and sector codes
//! - `numeric`: Fixed-point decimal types (Price, Volume) and rounding helpers
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod numeric;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::errors::*;
}
