pub mod error;
pub mod planner;
pub mod types;

pub use error::{PlanningError, PlanningResult};
pub use planner::{ChunkPlanner, PlannerLimits, MIB};
pub use types::{ByteRange, ChunkPlan};
