//! Device wiring and the externally callable control surface.
//!
//! [`AudioEngine`] owns the output stream and the single mutex around
//! the mixer. Every control operation resolves under that mutex, so a
//! call that returns before a callback begins is fully visible to it,
//! and a call made during a callback observes the state after the
//! callback completes.

use std::cell::Cell;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::assets::AssetId;
use crate::mixer::{Mixer, PlayParams, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::voice::VoiceHandle;

thread_local! {
    /// Address of the mixer mutex this thread holds through
    /// [`AudioEngine::enter_critical_section`], if any.
    static HELD_MIXER_LOCK: Cell<*const ()> = Cell::new(ptr::null());
}

pub struct AudioEngine {
    mixer: Arc<Mutex<Mixer>>,
    _stream: Option<cpal::Stream>,
    device_running: Arc<AtomicBool>,
    manual_entered: AtomicBool,
}

impl AudioEngine {
    /// Opens the output device and starts the callback. Backend failure
    /// is logged and leaves the engine silent; every control operation
    /// still works and the mixer state stays consistent.
    pub fn new() -> Self {
        let mixer = Arc::new(Mutex::new(Mixer::new()));
        let device_running = Arc::new(AtomicBool::new(false));

        let stream = match Self::open_stream(mixer.clone(), device_running.clone()) {
            Ok(stream) => {
                device_running.store(true, Ordering::Release);
                Some(stream)
            }
            Err(err) => {
                log::error!("failed to open playback device: {:#}", err);
                None
            }
        };

        Self {
            mixer,
            _stream: stream,
            device_running,
            manual_entered: AtomicBool::new(false),
        }
    }

    fn open_stream(mixer: Arc<Mutex<Mixer>>, running: Arc<AtomicBool>) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no output device available"))?;
        if let Ok(name) = device.name() {
            log::info!("sound output device: {}", name);
        }

        let config = cpal::StreamConfig {
            channels: OUTPUT_CHANNELS as u16,
            sample_rate: cpal::SampleRate(OUTPUT_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err: cpal::StreamError| {
            let s = err.to_string();
            // Under/overrun spam is not actionable.
            if !s.contains("underrun") && !s.contains("overrun") {
                log::warn!("output stream error: {}", s);
            }
        };

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if !running.load(Ordering::Acquire) {
                    data.fill(0.0);
                    return;
                }
                mixer.lock().fill(data, OUTPUT_SAMPLE_RATE);
            },
            err_fn,
            None,
        )?;
        stream.play()?;
        Ok(stream)
    }

    pub fn is_device_running(&self) -> bool {
        self.device_running.load(Ordering::Acquire)
    }

    fn lock_key(&self) -> *const () {
        Arc::as_ptr(&self.mixer) as *const ()
    }

    fn with_mixer<R>(&self, f: impl FnOnce(&mut Mixer) -> R) -> R {
        if HELD_MIXER_LOCK.with(|h| h.get()) == self.lock_key() {
            // This thread already holds the lock through the manual
            // critical section; locking again would deadlock.
            unsafe { f(&mut *self.mixer.data_ptr()) }
        } else {
            f(&mut self.mixer.lock())
        }
    }

    // ---- manual critical section ----

    /// Holds the mixer lock until [`leave_critical_section`], so a
    /// caller can batch many control calls atomically with respect to
    /// the audio callback.
    ///
    /// Must be paired with [`leave_critical_section`] on the same
    /// thread. A second enter before the matching leave is ignored,
    /// wherever it comes from.
    ///
    /// [`leave_critical_section`]: Self::leave_critical_section
    pub fn enter_critical_section(&self) {
        if self.manual_entered.load(Ordering::Acquire) {
            return;
        }
        mem::forget(self.mixer.lock());
        self.manual_entered.store(true, Ordering::Release);
        HELD_MIXER_LOCK.with(|h| h.set(self.lock_key()));
    }

    /// Releases the lock taken by [`enter_critical_section`]. Ignored
    /// on threads that do not hold it.
    ///
    /// [`enter_critical_section`]: Self::enter_critical_section
    pub fn leave_critical_section(&self) {
        if HELD_MIXER_LOCK.with(|h| h.get()) != self.lock_key() {
            return;
        }
        HELD_MIXER_LOCK.with(|h| h.set(ptr::null()));
        self.manual_entered.store(false, Ordering::Release);
        // Pairs with the guard forgotten in enter_critical_section.
        unsafe { self.mixer.force_unlock() };
    }

    // ---- assets ----

    pub fn create_sound(&self, frequency: u32, samples: &[f32]) -> AssetId {
        self.with_mixer(|m| m.create_sound(frequency, samples))
    }

    pub fn create_sound_stereo(&self, frequency: u32, frames: &[[f32; 2]]) -> AssetId {
        self.with_mixer(|m| m.create_sound_stereo(frequency, frames))
    }

    pub fn create_sound_from_file(&self, path: &str) -> AssetId {
        self.with_mixer(|m| m.create_sound_from_file(path))
    }

    pub fn clone_sound(&self, id: AssetId) -> AssetId {
        self.with_mixer(|m| m.clone_sound(id))
    }

    pub fn delete_sound(&self, id: AssetId) {
        self.with_mixer(|m| m.delete_sound(id));
    }

    pub fn free_all_sounds(&self) {
        self.with_mixer(|m| m.free_all_sounds());
    }

    pub fn is_sound_valid(&self, id: AssetId) -> bool {
        self.with_mixer(|m| m.is_sound_valid(id))
    }

    pub fn sound_duration(&self, id: AssetId) -> f32 {
        self.with_mixer(|m| m.sound_duration(id))
    }

    pub fn sound_frequency(&self, id: AssetId) -> u32 {
        self.with_mixer(|m| m.sound_frequency(id))
    }

    pub fn sound_frames(&self, id: AssetId) -> usize {
        self.with_mixer(|m| m.sound_frames(id))
    }

    pub fn sound_channels(&self, id: AssetId) -> u16 {
        self.with_mixer(|m| m.sound_channels(id))
    }

    pub fn get_sound_data(&self, id: AssetId, out: &mut [f32]) {
        self.with_mixer(|m| m.get_sound_data(id, out));
    }

    pub fn get_sound_data_stereo(&self, id: AssetId, out: &mut [[f32; 2]]) {
        self.with_mixer(|m| m.get_sound_data_stereo(id, out));
    }

    pub fn set_sound_data(&self, id: AssetId, input: &[f32]) {
        self.with_mixer(|m| m.set_sound_data(id, input));
    }

    pub fn set_sound_data_stereo(&self, id: AssetId, input: &[[f32; 2]]) {
        self.with_mixer(|m| m.set_sound_data_stereo(id, input));
    }

    // ---- playback ----

    pub fn play(&self, asset: AssetId) -> VoiceHandle {
        self.with_mixer(|m| m.play(asset))
    }

    pub fn play_loop(&self, asset: AssetId) -> VoiceHandle {
        self.with_mixer(|m| m.play_loop(asset))
    }

    pub fn play_deferred(&self, asset: AssetId, defer_seconds: f32) -> VoiceHandle {
        self.with_mixer(|m| m.play_deferred(asset, defer_seconds))
    }

    pub fn play_with(&self, asset: AssetId, params: PlayParams) -> VoiceHandle {
        self.with_mixer(|m| m.play_with(asset, params))
    }

    pub fn stop(&self, handle: VoiceHandle) {
        self.with_mixer(|m| m.stop(handle));
    }

    pub fn stop_all(&self) {
        self.with_mixer(|m| m.stop_all());
    }

    pub fn set_pitch(&self, handle: VoiceHandle, pitch: f32) {
        self.with_mixer(|m| m.set_pitch(handle, pitch));
    }

    pub fn set_volume(&self, handle: VoiceHandle, volume: f32) {
        self.with_mixer(|m| m.set_volume(handle, volume));
    }

    pub fn set_pan(&self, handle: VoiceHandle, pan: f32) {
        self.with_mixer(|m| m.set_pan(handle, pan));
    }

    pub fn is_playing(&self, handle: VoiceHandle) -> bool {
        self.with_mixer(|m| m.is_playing(handle))
    }

    pub fn get_play_pos(&self, handle: VoiceHandle) -> f32 {
        self.with_mixer(|m| m.get_play_pos(handle))
    }

    pub fn set_play_pos(&self, handle: VoiceHandle, pos_seconds: f32) {
        self.with_mixer(|m| m.set_play_pos(handle, pos_seconds));
    }

    // ---- global state & telemetry ----

    pub fn set_master_volume(&self, volume: f32) {
        self.with_mixer(|m| m.set_master_volume(volume));
    }

    pub fn output_sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }

    pub fn total_samples_played(&self) -> i64 {
        self.with_mixer(|m| m.total_samples_played())
    }

    pub fn total_time_played(&self) -> f64 {
        self.with_mixer(|m| m.total_time_played())
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        // Callbacks racing the teardown output silence instead of
        // touching a mixer that is going away.
        self.device_running.store(false, Ordering::Release);
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new()
    }
}
