use std::fs;
use std::path::Path;

use crate::err::{ConfigErr, Error};
use crate::time::{DEFAULT_FRAME_RATE, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::vm::FRAME_TICKS_PER_STEP;

/// Engine wide settings, shared by both tick producers and the scheduler
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub ppq: u32,
    /// Samples rendered per audio callback
    pub buffer_size: u32,
    pub frame_rate: u32,
    pub frame_ticks_per_step: u32,
    /// Ticks between sweeps of inactive sequences and handlers
    pub compaction_interval: u64,
    pub max_instructions_per_tick: usize,
    pub max_event_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            sample_rate: 44100,
            ppq: 480,
            buffer_size: 512,
            frame_rate: DEFAULT_FRAME_RATE,
            frame_ticks_per_step: FRAME_TICKS_PER_STEP,
            compaction_interval: 64,
            max_instructions_per_tick: 100_000,
            max_event_rounds: 16,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<EngineConfig, Error> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<EngineConfig, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config = EngineConfig::from_json(&text)?;
        log::debug!(target: "lockstep::config", "loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigErr> {
        if self.sample_rate < MIN_SAMPLE_RATE || self.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigErr::SampleRate(self.sample_rate));
        }
        if self.ppq == 0 {
            return Err(ConfigErr::Ppq(self.ppq));
        }
        if self.buffer_size == 0 {
            return Err(ConfigErr::BufferSize(self.buffer_size));
        }
        if self.frame_rate == 0 {
            return Err(ConfigErr::FrameRate(self.frame_rate));
        }
        if self.frame_ticks_per_step == 0 {
            return Err(ConfigErr::FrameTicksPerStep(self.frame_ticks_per_step));
        }
        if self.compaction_interval == 0 {
            return Err(ConfigErr::CompactionInterval(self.compaction_interval));
        }
        Ok(())
    }
}
