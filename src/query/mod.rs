//! ACER Query Layer
//!
//! Pattern queries and the pieces of the two-phase filter:
//!
//! - **Pattern**: Variables, per-variable range constraints, time window
//! - **Predicate**: A constraint resolved to the scaled index domain
//! - **IntervalSet**: Shrinking set of time windows used for pruning
//! - **PatternMatcher**: Consumer of the filtered candidate stream
//!
//! # Example
//!
//! ```rust,ignore
//! use acer_index::query::{CompareOp, Constraint, Pattern};
//!
//! let pattern = Pattern::sequence(1_000)
//!     .variable("a", "IBM")
//!     .variable("b", "MSFT")
//!     .constraint(Constraint::new("a", "volume").compare(CompareOp::Ge, 80.0));
//!
//! let candidates = index.query(&pattern)?;
//! ```

mod error;
pub mod filter;
pub mod interval_set;
pub mod matcher;
pub mod pattern;

pub use error::{QueryError, QueryResult};
pub use filter::{drop_tombstoned, merge_pairs, Predicate, PredicateKind, RelativePredicate};
pub use interval_set::{Interval, IntervalSet};
pub use matcher::{CandidateCollector, PatternMatcher};
pub use pattern::{Bound, CompareOp, Constraint, Pattern, PatternKind, PatternNode, Variable};
