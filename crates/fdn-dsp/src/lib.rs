//! Feedback delay network synthesis engine.
//!
//! Matrix constructors, delay lines, filters, the FDN core and its
//! specialized variants, and an offline preset renderer.
//!
//! Single entry point: `render(&params) -> RenderOutput`.

pub mod delay;
pub mod fdn;
pub mod governor;
pub mod matrix;
pub mod params;
pub mod render;
pub mod smoother;
pub mod svf;
pub mod variants;

pub use fdn::FeedbackDelayNetwork;
pub use matrix::{FeedbackMatrix, FeedbackMatrixType};
pub use params::RenderParams;
pub use render::{render, RenderOutput, RenderStatus};
