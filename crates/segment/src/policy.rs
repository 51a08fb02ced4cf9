//! Policy interface and factory

use std::time::Instant;

use speech_relay_config::{PolicyKind, SegmentationSettings};

use crate::{
    ConferencePolicy, ContinuousPolicy, FinalOnlyPolicy, HybridPolicy, NaturalPhrasePolicy,
    UltraLowLatencyPolicy,
};

/// A unit of text handed to synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisUnit {
    /// A carved utterance for request-mode synthesis.
    Utterance { text: String },
    /// A raw text suffix for a persistent synthesis channel.
    Delta { text: String },
}

impl SynthesisUnit {
    pub fn text(&self) -> &str {
        match self {
            Self::Utterance { text } | Self::Delta { text } => text,
        }
    }
}

/// Result of feeding one event to a policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyOutput {
    /// Units ready for synthesis, in speaking order.
    pub units: Vec<SynthesisUnit>,
    /// Passthrough text for listener display.
    pub display_text: String,
}

impl PolicyOutput {
    pub fn display_only(text: &str) -> Self {
        Self {
            units: Vec::new(),
            display_text: text.to_string(),
        }
    }
}

/// One segmentation policy instance, exclusively owned by a
/// (session, language) pipeline and driven serially.
pub trait SegmentationPolicy: Send {
    /// Consume one translated transcript event.
    fn push(&mut self, text: &str, is_final: bool, now: Instant) -> PolicyOutput;

    /// Time-driven emissions (stability windows, quiescence delays).
    /// Called periodically between events; returns units that became ready.
    fn poll(&mut self, now: Instant) -> Vec<SynthesisUnit>;

    /// Clear all state. Used on session teardown.
    fn reset(&mut self);

    fn kind(&self) -> PolicyKind;
}

/// Bind exactly one policy from configuration.
pub fn build_policy(settings: &SegmentationSettings) -> Box<dyn SegmentationPolicy> {
    match settings.policy {
        PolicyKind::FinalOnly => Box::new(FinalOnlyPolicy::new()),
        PolicyKind::Hybrid => Box::new(HybridPolicy::new(settings.hybrid.clone())),
        PolicyKind::Conference => Box::new(ConferencePolicy::new()),
        PolicyKind::NaturalPhrase => Box::new(NaturalPhrasePolicy::new(settings.natural.clone())),
        PolicyKind::UltraLowLatency => Box::new(UltraLowLatencyPolicy::new(settings.ultra.clone())),
        PolicyKind::Continuous => Box::new(ContinuousPolicy::new(settings.continuous.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_binds_selected_policy() {
        for (kind, expect) in [
            (PolicyKind::FinalOnly, PolicyKind::FinalOnly),
            (PolicyKind::Hybrid, PolicyKind::Hybrid),
            (PolicyKind::Conference, PolicyKind::Conference),
            (PolicyKind::NaturalPhrase, PolicyKind::NaturalPhrase),
            (PolicyKind::UltraLowLatency, PolicyKind::UltraLowLatency),
            (PolicyKind::Continuous, PolicyKind::Continuous),
        ] {
            let settings = SegmentationSettings {
                policy: kind,
                ..Default::default()
            };
            assert_eq!(build_policy(&settings).kind(), expect);
        }
    }
}
