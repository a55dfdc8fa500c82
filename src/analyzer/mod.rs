//! Skill analysis pipeline: static scan, injection scan, sandboxed
//! execution, and verdict fusion.

mod dynamic;
mod skill;
mod static_scan;

pub use dynamic::{DynamicAnalysis, DynamicCodeAnalyzer};
pub use skill::SkillAnalyzer;
pub use static_scan::{StaticCodeAnalyzer, StaticReport};
