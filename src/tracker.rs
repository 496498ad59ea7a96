use crate::config::ChannelConfig;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// One emitted reading: a channel flipped and we know the interval since its
/// previous flip. Written to the sink once, never retained.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSample {
    pub channel: String,
    pub timestamp_ms: i64,
    pub watts: f64,
}

/// Each state transition represents exactly one watt-hour, so the
/// instantaneous draw is milliseconds-per-hour over the elapsed interval.
/// Callers must ensure `current_ms > previous_ms`.
pub fn usage_watts(current_ms: i64, previous_ms: i64) -> f64 {
    MILLIS_PER_HOUR / (current_ms - previous_ms) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStage {
    /// No transition seen yet for this channel.
    Unseeded,
    /// One transition timestamp recorded; no interval known yet.
    Primed,
    /// Every further flip yields an interval and a sample.
    Steady,
}

/// How the very first interval per channel is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPolicy {
    /// Each channel emits from its own second observed flip onward.
    PerChannel,
    /// Additionally discards the first interval computed process-wide,
    /// guarding against a noisy first measurement after startup.
    GlobalGuard,
}

#[derive(Debug)]
struct ChannelMemory {
    last_transition_ms: Option<i64>,
    stage: ChannelStage,
}

/// Detects per-channel flips between two consecutive polls and drives the
/// three-stage bootstrap machine. Owns all cross-iteration memory; a process
/// restart puts every channel back to `Unseeded`.
pub struct UsageTracker {
    names: Vec<String>,
    policy: BootstrapPolicy,
    prev_states: Option<Vec<bool>>,
    memory: Vec<ChannelMemory>,
    guard_armed: bool,
}

impl UsageTracker {
    pub fn new(channels: &[ChannelConfig], policy: BootstrapPolicy) -> Self {
        Self {
            names: channels.iter().map(|c| c.name.clone()).collect(),
            policy,
            prev_states: None,
            memory: channels
                .iter()
                .map(|_| ChannelMemory {
                    last_transition_ms: None,
                    stage: ChannelStage::Unseeded,
                })
                .collect(),
            guard_armed: false,
        }
    }

    /// Feed one successfully decoded state vector. Returns the samples this
    /// poll produced, in channel order. "Not ready" cycles must simply not
    /// call this, which leaves all memory untouched.
    pub fn observe(&mut self, states: Vec<bool>, now_ms: i64) -> Vec<UsageSample> {
        debug_assert_eq!(states.len(), self.names.len());

        let Some(prev) = self.prev_states.as_ref() else {
            // First valid read only seeds the comparison baseline.
            self.prev_states = Some(states);
            return Vec::new();
        };

        let mut samples = Vec::new();
        for index in detect_transitions(prev, &states) {
            if let Some(sample) = self.on_transition(index, now_ms) {
                samples.push(sample);
            }
        }

        self.prev_states = Some(states);
        samples
    }

    fn on_transition(&mut self, index: usize, now_ms: i64) -> Option<UsageSample> {
        let memory = &mut self.memory[index];
        let Some(last_ms) = memory.last_transition_ms else {
            memory.last_transition_ms = Some(now_ms);
            memory.stage = ChannelStage::Primed;
            return None;
        };

        if now_ms <= last_ms {
            tracing::warn!(
                channel = %self.names[index],
                now_ms,
                last_ms,
                "non-increasing transition timestamp, discarding sample"
            );
            return None;
        }

        memory.last_transition_ms = Some(now_ms);
        memory.stage = ChannelStage::Steady;

        if self.policy == BootstrapPolicy::GlobalGuard && !self.guard_armed {
            // First computable interval since startup is not trusted.
            self.guard_armed = true;
            return None;
        }

        Some(UsageSample {
            channel: self.names[index].clone(),
            timestamp_ms: now_ms,
            watts: usage_watts(now_ms, last_ms),
        })
    }

    #[cfg(test)]
    fn stage(&self, index: usize) -> ChannelStage {
        self.memory[index].stage
    }
}

/// Ascending indices whose boolean state differs between the two vectors.
pub fn detect_transitions(prev: &[bool], curr: &[bool]) -> Vec<usize> {
    prev.iter()
        .zip(curr)
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(index, _)| index)
        .collect()
}
