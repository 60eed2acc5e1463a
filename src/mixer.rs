//! The mixer core: voice table, handle resolution, the per-callback
//! fill routine, and every control operation. This type holds no lock
//! itself; the engine wraps it in the single mixer mutex and the tests
//! drive it directly.

use crate::assets::{AssetId, AssetPool, AudioAsset};
use crate::voice::{Voice, VoiceHandle, MAX_VOICES};

/// Output format delivered to the audio device.
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;
pub const OUTPUT_CHANNELS: usize = 2;

/// Frames mixed per inner chunk of the fill routine.
pub(crate) const MIX_STEP: usize = 256;

const MIN_PITCH: f32 = 1e-5;
const MAX_PITCH: f32 = 1000.0;
const MAX_VOLUME: f32 = 100_000.0;

/// Parameters for [`Mixer::play_with`]. The defaults match a plain
/// [`Mixer::play`]: full volume, natural pitch, centered, whole asset,
/// no loop, immediate start.
#[derive(Clone, Copy, Debug)]
pub struct PlayParams {
    pub volume: f32,
    pub pitch: f32,
    /// -1 full left .. +1 full right.
    pub pan: f32,
    /// Playback window, in seconds of the asset.
    pub start_time: f32,
    pub end_time: f32,
    pub looping: bool,
    /// Positive: seconds of pre-roll silence before the voice starts.
    /// Negative: start immediately, as if the sound had already been
    /// playing for that long.
    pub defer: f32,
}

impl Default for PlayParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pitch: 1.0,
            pan: 0.0,
            start_time: 0.0,
            end_time: f32::MAX,
            looping: false,
            defer: 0.0,
        }
    }
}

pub struct Mixer {
    voices: [Voice; MAX_VOICES],
    assets: AssetPool,
    master_volume: f32,
    total_samples_played: i64,
    total_time_played: f64,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            voices: [Voice::default(); MAX_VOICES],
            assets: AssetPool::new(),
            master_volume: 1.0,
            total_samples_played: 0,
            total_time_played: 0.0,
        }
    }

    // ---- voice table ----

    /// First-fit scan over slots 1..N. Advances the slot version so any
    /// handle to the previous occupant goes stale.
    fn allocate_voice(&mut self) -> Option<usize> {
        for i in 1..MAX_VOICES {
            if self.voices[i].is_empty() {
                self.voices[i].version = self.voices[i].version.wrapping_add(MAX_VOICES as u32);
                return Some(i);
            }
        }
        None
    }

    fn handle_to_index(&self, handle: VoiceHandle) -> Option<usize> {
        let idx = handle.index();
        if idx == 0 || self.voices[idx].version != handle.version_bits() {
            return None;
        }
        Some(idx)
    }

    // ---- assets ----

    pub fn create_sound(&mut self, frequency: u32, samples: &[f32]) -> AssetId {
        match AudioAsset::from_mono(frequency, samples) {
            Some(asset) => self.assets.insert(asset),
            None => {
                log::error!("cannot create sound: invalid frequency or empty sample data");
                AssetId::INVALID
            }
        }
    }

    pub fn create_sound_stereo(&mut self, frequency: u32, frames: &[[f32; 2]]) -> AssetId {
        match AudioAsset::from_stereo(frequency, frames) {
            Some(asset) => self.assets.insert(asset),
            None => {
                log::error!("cannot create sound: invalid frequency or empty sample data");
                AssetId::INVALID
            }
        }
    }

    pub fn create_sound_from_file(&mut self, path: &str) -> AssetId {
        let pcm = match crate::decode::decode_file(path) {
            Ok(pcm) => pcm,
            Err(err) => {
                log::error!("cannot create sound from '{}': {:#}", path, err);
                return AssetId::INVALID;
            }
        };
        match AudioAsset::from_interleaved(pcm.sample_rate, pcm.channels, &pcm.samples) {
            Some(asset) => self.assets.insert(asset),
            None => {
                log::error!("cannot create sound from '{}': empty or unsupported stream", path);
                AssetId::INVALID
            }
        }
    }

    /// Deep copy; the new asset owns an independent buffer.
    pub fn clone_sound(&mut self, id: AssetId) -> AssetId {
        match self.assets.get(id) {
            Some(asset) => {
                let copy = asset.clone();
                self.assets.insert(copy)
            }
            None => AssetId::INVALID,
        }
    }

    /// Frees the asset's buffer. Any voice still reading it is forced
    /// into its fade-out first, so the buffer is unreferenced by the
    /// time it is dropped.
    pub fn delete_sound(&mut self, id: AssetId) {
        if !self.assets.contains(id) {
            return;
        }
        let Self { voices, assets, .. } = self;
        let pcm = assets.get(id);
        for voice in voices.iter_mut() {
            if voice.asset == Some(id) && !voice.is_empty() {
                voice.set_stop_mode(pcm);
            }
        }
        self.assets.remove(id);
    }

    /// Teardown path: fade out every voice and drop every buffer still
    /// in the pool.
    pub fn free_all_sounds(&mut self) {
        self.stop_all();
        self.assets.clear();
    }

    pub fn is_sound_valid(&self, id: AssetId) -> bool {
        self.assets.get(id).is_some()
    }

    pub fn sound_duration(&self, id: AssetId) -> f32 {
        self.assets.get(id).map(|a| a.duration()).unwrap_or(0.0)
    }

    pub fn sound_frequency(&self, id: AssetId) -> u32 {
        self.assets.get(id).map(|a| a.frequency()).unwrap_or(0)
    }

    pub fn sound_frames(&self, id: AssetId) -> usize {
        self.assets.get(id).map(|a| a.frames()).unwrap_or(0)
    }

    pub fn sound_channels(&self, id: AssetId) -> u16 {
        self.assets.get(id).map(|a| a.channels()).unwrap_or(0)
    }

    pub fn get_sound_data(&self, id: AssetId, out: &mut [f32]) {
        if let Some(asset) = self.assets.get(id) {
            asset.read_mono(out);
        }
    }

    pub fn get_sound_data_stereo(&self, id: AssetId, out: &mut [[f32; 2]]) {
        if let Some(asset) = self.assets.get(id) {
            asset.read_stereo(out);
        }
    }

    pub fn set_sound_data(&mut self, id: AssetId, input: &[f32]) {
        if let Some(asset) = self.assets.get_mut(id) {
            asset.write_mono(input);
        }
    }

    pub fn set_sound_data_stereo(&mut self, id: AssetId, input: &[[f32; 2]]) {
        if let Some(asset) = self.assets.get_mut(id) {
            asset.write_stereo(input);
        }
    }

    // ---- playback ----

    pub fn play(&mut self, asset: AssetId) -> VoiceHandle {
        self.play_with(asset, PlayParams::default())
    }

    pub fn play_loop(&mut self, asset: AssetId) -> VoiceHandle {
        self.play_with(
            asset,
            PlayParams {
                looping: true,
                ..PlayParams::default()
            },
        )
    }

    pub fn play_deferred(&mut self, asset: AssetId, defer_seconds: f32) -> VoiceHandle {
        self.play_with(
            asset,
            PlayParams {
                defer: defer_seconds,
                ..PlayParams::default()
            },
        )
    }

    /// Allocates a voice and starts it. Returns
    /// [`VoiceHandle::INVALID`] when the pool is exhausted, the asset is
    /// gone, or the asset is too short to interpolate.
    pub fn play_with(&mut self, asset: AssetId, params: PlayParams) -> VoiceHandle {
        let (frequency, channels, frames) = match self.assets.get(asset) {
            Some(pcm) if pcm.frames() > 2 => {
                (pcm.frequency() as f64, pcm.channels(), pcm.frames())
            }
            _ => return VoiceHandle::INVALID,
        };

        let Some(idx) = self.allocate_voice() else {
            return VoiceHandle::INVALID;
        };

        let pitch = params.pitch.clamp(MIN_PITCH, MAX_PITCH);
        let pan = params.pan.clamp(-1.0, 1.0);
        let volume = params.volume.clamp(0.0, MAX_VOLUME);

        let last = (frames - 1) as f64;
        let start = (params.start_time as f64 * frequency).floor().clamp(0.0, last);
        let stop = (params.end_time as f64 * frequency).floor().clamp(start, last);
        let mut pos = start;
        if params.defer < 0.0 {
            pos = (-params.defer as f64 * frequency).floor().min(stop);
        }

        let master_volume = self.master_volume;
        let voice = &mut self.voices[idx];
        voice.asset = Some(asset);
        voice.channels = channels;
        voice.volume = volume;
        voice.pitch = pitch;
        voice.pan = pan;
        // Gains start at their steady-state targets so the first chunk
        // does not ramp in from silence.
        voice.volume_l = master_volume * volume * (1.0 + pan).min(1.0);
        voice.volume_r = master_volume * volume * (1.0 - pan).min(1.0);
        voice.volume_trend_l = 0.0;
        voice.volume_trend_r = 0.0;
        voice.pos = pos;
        voice.start_pos = start;
        voice.stop_pos = stop;
        voice.looping = params.looping;
        voice.stop_mode = false;
        voice.time_to_start = params.defer.max(0.0) as f64;
        voice.waiting_start = voice.time_to_start != 0.0;

        VoiceHandle(idx as u32 | voice.version)
    }

    pub fn stop(&mut self, handle: VoiceHandle) {
        let Some(idx) = self.handle_to_index(handle) else {
            return;
        };
        let Self { voices, assets, .. } = self;
        let voice = &mut voices[idx];
        if voice.asset.is_none() || voice.stop_mode {
            return;
        }
        let pcm = voice.asset.and_then(|id| assets.get(id));
        voice.set_stop_mode(pcm);
    }

    pub fn stop_all(&mut self) {
        let Self { voices, assets, .. } = self;
        for voice in voices.iter_mut() {
            if !voice.is_empty() {
                let pcm = voice.asset.and_then(|id| assets.get(id));
                voice.set_stop_mode(pcm);
            }
        }
    }

    pub fn set_pitch(&mut self, handle: VoiceHandle, pitch: f32) {
        if let Some(idx) = self.handle_to_index(handle) {
            self.voices[idx].pitch = pitch;
        }
    }

    pub fn set_volume(&mut self, handle: VoiceHandle, volume: f32) {
        if let Some(idx) = self.handle_to_index(handle) {
            self.voices[idx].volume = volume;
        }
    }

    pub fn set_pan(&mut self, handle: VoiceHandle, pan: f32) {
        if let Some(idx) = self.handle_to_index(handle) {
            self.voices[idx].pan = pan;
        }
    }

    pub fn is_playing(&self, handle: VoiceHandle) -> bool {
        match self.handle_to_index(handle) {
            Some(idx) => !self.voices[idx].stop_mode,
            None => false,
        }
    }

    /// Current position in seconds; 0 for stale handles, voices fading
    /// out, and voices still in their pre-roll.
    pub fn get_play_pos(&self, handle: VoiceHandle) -> f32 {
        let Some(idx) = self.handle_to_index(handle) else {
            return 0.0;
        };
        let voice = &self.voices[idx];
        if voice.stop_mode || voice.waiting_start {
            return 0.0;
        }
        match voice.asset.and_then(|id| self.assets.get(id)) {
            Some(pcm) => (voice.pos / pcm.frequency() as f64) as f32,
            None => 0.0,
        }
    }

    /// Seeks within the playback window; clamped to it. Refused for
    /// voices that are fading out.
    pub fn set_play_pos(&mut self, handle: VoiceHandle, pos_seconds: f32) {
        let Some(idx) = self.handle_to_index(handle) else {
            return;
        };
        let Self { voices, assets, .. } = self;
        let voice = &mut voices[idx];
        if voice.stop_mode {
            return;
        }
        let Some(pcm) = voice.asset.and_then(|id| assets.get(id)) else {
            return;
        };
        let pos = (pcm.frequency() as f64 * pos_seconds as f64).floor();
        voice.pos = pos.clamp(voice.start_pos, voice.stop_pos);
    }

    // ---- global state ----

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume;
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn total_samples_played(&self) -> i64 {
        self.total_samples_played
    }

    pub fn total_time_played(&self) -> f64 {
        self.total_time_played
    }

    // ---- the callback routine ----

    /// Fills `out` (interleaved stereo, `out.len() / 2` frames) with the
    /// sum of all active voices. This is the whole audio callback; it
    /// must never fail and never allocate.
    pub fn fill(&mut self, out: &mut [f32], frequency: u32) {
        out.fill(0.0);

        let inv_frequency = 1.0 / frequency as f64;
        let total_frames = out.len() / OUTPUT_CHANNELS;
        let mut done = 0;

        while done < total_frames {
            let chunk = (total_frames - done).min(MIX_STEP);
            let buf = &mut out[done * OUTPUT_CHANNELS..(done + chunk) * OUTPUT_CHANNELS];

            let Self { voices, assets, master_volume, .. } = self;
            for voice in voices.iter_mut() {
                if voice.is_empty() {
                    continue;
                }
                let pcm = voice.asset.and_then(|id| assets.get(id));
                voice.mix_to(buf, pcm, *master_volume, inv_frequency, chunk as f64 * inv_frequency);
            }

            self.total_samples_played += chunk as i64;
            self.total_time_played += chunk as f64 * inv_frequency;
            done += chunk;
        }
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}
