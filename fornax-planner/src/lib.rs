//! Range Planner: turns a subset request into the byte ranges that hold it.

pub mod error;
pub mod plan;
pub mod request;

pub use error::PlanError;
pub use plan::{PlannedRange, PlannerOptions, RangePlan, Segment, SegmentTarget, plan};
pub use request::{AxisSelection, Position, SubsetRequest};

pub mod prelude {
    pub use crate::error::PlanError;
    pub use crate::plan::*;
    pub use crate::request::*;
}
