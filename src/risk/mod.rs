//! Risk triage of captured sessions

pub mod annotation;
mod classifier;
pub mod hunt;

pub use annotation::{
    analyze_annotation, assess_annotation, AnnotationAnalysis, AnnotationSeverity,
    SeverityFilter, ThreatAssessment, ThreatLevel, ThreatType,
};
pub use classifier::{
    annotation_indicators, classification_label, classify, is_retained, recommendations,
    RiskAssessment, RiskLevel, EXTERNAL_INTEL_FLAG, UNRATED_ANNOTATION_SCORE,
};
pub use hunt::{hunt, HuntFinding, HuntType};
