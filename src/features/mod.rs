//! Pure, synchronous URL classifiers.

pub mod category;
pub mod tld_risk;
pub mod url_structure;

pub use category::UrlCategory;
pub use url_structure::{StructuralAnalyzer, StructuralIssue, StructuralReport};
