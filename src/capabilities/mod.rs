pub mod explorer;

pub use explorer::{ExplorerComponent, PartitionPlan, VisitMark, VISITED_CHANNEL};
