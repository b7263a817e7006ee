//! Component definitions for the object tree.
//!
//! Components are pure data attached to object entities. An object is a
//! subspace when it carries [`Subspace`], has connectors when it carries
//! [`crate::connector::Connectors`], and so on: capability checks replace
//! type casts. Behaviour lives in [`crate::world`].

mod shape;
mod tree;

pub use shape::*;
pub use tree::*;
