//! Point and dataset containers consumed by every learner

mod data;
mod point;

pub use data::Data;
pub use point::{Feature, Point};
