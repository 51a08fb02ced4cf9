//! Segmentation and stability policies.
//!
//! A policy consumes the ordered stream of translated `(text, is_final)`
//! events for one (session, language) and decides what gets voiced: disjoint
//! at-most-once utterances, or raw text deltas for a persistent synthesis
//! channel. Policies are synchronous, own all their state, and never panic
//! on input - unexpected text degrades to a safe pass-through.

mod conference;
mod continuous;
mod final_only;
mod fingerprint;
mod hybrid;
mod natural;
mod policy;
pub mod punctuate;
pub mod sentence;
mod ultra;

pub use conference::ConferencePolicy;
pub use continuous::ContinuousPolicy;
pub use final_only::FinalOnlyPolicy;
pub use fingerprint::FingerprintSet;
pub use hybrid::HybridPolicy;
pub use natural::NaturalPhrasePolicy;
pub use policy::{build_policy, PolicyOutput, SegmentationPolicy, SynthesisUnit};
pub use ultra::UltraLowLatencyPolicy;
