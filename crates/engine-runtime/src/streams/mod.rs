pub mod planner;
pub mod transform;
