//! # fdm-optimizer
//!
//! Parameter spaces and ask/tell optimization for the FDM design search.
//!
//! Provides the mixed discrete/continuous parameter space, the design-space
//! builder with its warm-start modes, a registry of derivative-free search
//! strategies working on a normalized genome, and the serializable
//! [`OptimizerHandle`] that keeps proposals and reports in lockstep.

mod adapter;
mod design;
mod space;
pub mod strategy;

pub use adapter::{OptimizerHandle, Recommendation};
pub use design::{build_space, BuildMode, DesignSpace, Dimension, FieldCategory, GainPath};
pub use space::{Candidate, ParameterDef, ParameterSpace, ParameterSpec, ParameterValue};
pub use strategy::{BudgetSlice, OptimizerParams, PopulationSize, SliceKeyword, Strategy};
