//! formflow: a declarative multi-step form engine.
//!
//! Journeys are trees of structured values — steps, blocks, expressions,
//! predicates and transitions. The compile pipeline turns a journey into
//! per-step artefacts (projected registries, a dependency graph and a
//! handler table); the evaluator walks an artefact per request to produce
//! the rendered view model, validation results and navigation outcome.

pub mod answers;
pub mod compile;
pub mod error;
pub mod eval;
pub mod ir;
pub mod parse;
pub mod registry;
