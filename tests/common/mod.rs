#![allow(dead_code, unused_imports)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from platecascade for tests
pub use platecascade::detection::{RawOutput, SuppressionMode};
pub use platecascade::{
    BoundingBox, Cancellation, Cascade, CascadeError, CascadeStage, Detection, Outcome, Token,
};
