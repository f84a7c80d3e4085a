//! # Typed Parameter Module
//!
//! Declarative parameter handling for request handlers. A handler declares
//! its parameters by name, optionally with a type from the process-wide
//! [`TypeRegistry`] and any number of predicates; the pipeline in
//! [`bind_params`] extracts, decodes, converts, asserts, and
//! predicate-checks each one before the handler body ever runs.
//!
//! ## Priorities
//!
//! Every type carries an integer priority (default 0). Parameters are
//! bound in ascending priority order, declaration order breaking ties, so
//! a higher-priority type can look at values bound earlier: a `game` type
//! at priority 2 can resolve its raw string against the `user` bound at
//! priority 1.

mod core;

pub use core::{
    bind_params, AssertFn, ConvertFn, HttpType, ParamEnv, ParamSpec, PredicateFn, TypeRegistry,
};
