//! SQL-equivalence metrics.
//!
//! Three metrics share one contract ([`Metric`]): exact match over
//! normalized text, weighted per-clause component matching, and execution
//! accuracy over live result sets.

pub mod canonical;
pub mod component;
pub mod errors;
pub mod exact_match;
pub mod execution_accuracy;
pub mod metric;
pub mod model;

pub use component::{ComponentMatching, CLAUSE_WEIGHTS};
pub use errors::MetricError;
pub use exact_match::ExactMatch;
pub use execution_accuracy::{
    compare_results, normalize_value, ExecutionAccuracy, ExecutionOptions, NormalizedValue,
};
pub use metric::{Metric, MetricSuite};
pub use model::{ErrorOrigin, EvaluationContext, MetricKind, MetricResult};
