use std::thread;
use std::time::Duration;

use chime_engine::{AudioEngine, PlayParams};

fn main() {
    env_logger::init();

    let engine = AudioEngine::new();
    println!("[demo] device running: {}", engine.is_device_running());

    // One second of a 440 Hz tone at the output rate.
    let rate = engine.output_sample_rate();
    let tone: Vec<f32> = (0..rate)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / rate as f32).sin() * 0.25)
        .collect();
    let sound = engine.create_sound(rate, &tone);

    println!("[demo] looping tone...");
    let voice = engine.play_loop(sound);
    thread::sleep(Duration::from_secs(2));

    println!("[demo] panning left, pitching up...");
    engine.set_pan(voice, -0.5);
    engine.set_pitch(voice, 1.5);
    thread::sleep(Duration::from_secs(1));

    println!("[demo] echo in half a second...");
    let echo = engine.play_with(
        sound,
        PlayParams {
            volume: 0.5,
            pan: 0.5,
            defer: 0.5,
            ..PlayParams::default()
        },
    );
    thread::sleep(Duration::from_secs(2));

    engine.stop(voice);
    engine.stop(echo);
    thread::sleep(Duration::from_millis(200));

    println!("[demo] frames played: {}", engine.total_samples_played());
    println!("[demo] time played: {:.2}s", engine.total_time_played());

    engine.free_all_sounds();
    println!("[demo] done.");
}
