//! Small ordered containers used for membership bookkeeping.
//!
//! - [`AssocList`]: insertion-ordered key -> value association, used where a
//!   name or topic maps to a dynamically sized set.
//! - [`MemberSet`]: insertion-ordered set with round-robin rotation.

mod assoc;
mod members;

pub use assoc::AssocList;
pub use members::MemberSet;
