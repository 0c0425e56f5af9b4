//! Cross-cutting helpers: assertion macros and small generic utilities.

pub mod general;
pub mod macros;
