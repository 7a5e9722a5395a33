pub mod descriptor;
pub mod emulate;
pub mod executor;
pub mod fetch;
pub mod kind;
pub mod output;

pub use descriptor::{QueryDescriptor, StatementMeta};
pub use fetch::{DebugInfo, Keyed, Output, StatementInfo};
pub use kind::QueryKind;
pub use output::{ColumnRef, FetchPlan, OutputArg, OutputSpec, Strategy, resolve};
