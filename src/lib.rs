//! chime_engine — the real-time software audio mixer of the chime
//! interactive-media runtime.
//!
//! A fixed pool of voices plays PCM assets into the output device
//! callback: resampled by linear interpolation, panned, gain-smoothed,
//! and faded out on stop. One mutex serializes the callback and all
//! control calls; versioned handles keep stale references harmless.

pub mod assets;
pub mod decode;
pub mod engine;
pub mod mixer;
pub mod voice;


pub use assets::{AssetId, AssetPool, AudioAsset};
pub use engine::AudioEngine;
pub use mixer::{Mixer, PlayParams, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
pub use voice::{VoiceHandle, MAX_VOICES};
