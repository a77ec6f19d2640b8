//! Pearl: multi-stage research synthesis
//!
//! search → claim extraction → angle generation, each stage billed and
//! reported on its own.

pub mod angles;
pub mod extract;
pub mod pipeline;
pub mod types;

pub use angles::{rank_angles, TOP_ANGLES};
pub use extract::{normalize_ids, MAX_PAPERS};
pub use pipeline::{PearlService, TOP_PAPERS};
pub use types::{
    AnglesReport, ExtractionError, ExtractionReport, PaperAnalysis, ResearchAngle,
    SynthesisReport,
};
