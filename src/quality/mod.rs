//! Network quality assessment and the tier-derived run profile.

mod advisor;
mod profile;

pub use advisor::{LatencyProbe, QualityAdvisor, QualityAssessment};
pub use profile::{NetworkQualityTier, QualityProfile, TimeoutSet, TransportClass};
