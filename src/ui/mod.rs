pub mod summary;

pub use summary::{print_plan, print_summary};
