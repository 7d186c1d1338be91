//! Domain types: canonical variables, gridded fields, relational rows.

pub mod field;
pub mod run;
pub mod variable;

pub use field::{BoundingBox, Field, FieldSet, InvalidGrid};
pub use run::{
    GridSnapshot, ModelPointValue, ModelRun, NewGridSnapshot, NewModelPointValue, NewPointMetric,
    PointMetric, PointMetricQuery, RunStatus, VariableSummary,
};
pub use variable::Variable;
