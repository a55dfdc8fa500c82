//! Inspection engine for ClawShield.
//!
//! This module contains the firewall pipeline:
//! - Rule Engine: ordered declarative conditions from the store
//! - Threat Scorer: weighted-pattern composite risk
//! - Prompt-Injection Detector: signature matching with decode unwrap
//! - Loop Detector: rolling per-agent message windows
//! - Exfiltration Detector: destination trust + payload sensitivity
//! - Response Scrubber: post-proxy response hygiene
//! - Firewall Orchestrator: sequences the stages, fail-closed

mod exfil;
mod injection;
mod loopdetect;
mod orchestrator;
mod rules;
mod scorer;
mod scrubber;

pub use exfil::*;
pub use injection::*;
pub use loopdetect::*;
pub use orchestrator::*;
pub use rules::*;
pub use scorer::*;
pub use scrubber::*;
