pub mod ctp;
pub mod statespace;

pub use ctp::{Ctp, RoadEdge};
pub use statespace::StateSpace;
