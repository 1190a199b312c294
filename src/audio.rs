//! Audio devices
//!
//! Microphone sources deliver 4096-sample frames of 16 kHz mono audio into
//! the session loop. With the `pulse` feature the default PulseAudio source
//! and sink are used through the simple API; a WAV file can stand in for the
//! microphone on any build.
//!
//! Each device runs on its own OS thread since the simple API blocks.

use crate::audio_capture::{FrameChunker, FRAME_SAMPLES, INPUT_SAMPLE_RATE};
use crate::devices::{CaptureTrack, EventSink};
use crate::error::{Result, SessionError};
use crate::media_event::{SessionEvent, TrackKind};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Replays a WAV file as if it were a live microphone.
pub struct WavMicrophone {
    stop: Arc<AtomicBool>,
}

impl WavMicrophone {
    /// The file must be 16 kHz mono.
    pub fn open(path: &Path, epoch: u64, events: EventSink) -> Result<Self> {
        let reader = hound::WavReader::open(path)
            .map_err(|e| SessionError::media(format!("{}: {}", path.display(), e)))?;
        let spec = reader.spec();
        if spec.sample_rate != INPUT_SAMPLE_RATE || spec.channels != 1 {
            return Err(SessionError::media(format!(
                "{}: need {} Hz mono, got {} Hz x{}",
                path.display(),
                INPUT_SAMPLE_RATE,
                spec.sample_rate,
                spec.channels
            )));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let name = path.display().to_string();
        std::thread::Builder::new()
            .name("wav-mic".into())
            .spawn(move || {
                info!("🎙️  Replaying {} as microphone", name);
                replay_wav(reader, epoch, &events, &stop_flag);
            })
            .map_err(|e| SessionError::media(e.to_string()))?;

        Ok(Self { stop })
    }
}

fn replay_wav<R: std::io::Read>(
    mut reader: hound::WavReader<R>,
    epoch: u64,
    events: &EventSink,
    stop: &AtomicBool,
) {
    let spec = reader.spec();
    let samples: Box<dyn Iterator<Item = std::result::Result<f32, hound::Error>> + '_> =
        match spec.sample_format {
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                Box::new(reader.samples::<i32>().map(move |s| s.map(|v| v as f32 / scale)))
            }
            hound::SampleFormat::Float => Box::new(reader.samples::<f32>()),
        };

    let frame_time = Duration::from_secs_f64(FRAME_SAMPLES as f64 / INPUT_SAMPLE_RATE as f64);
    let started = Instant::now();
    let mut chunker = FrameChunker::new();
    let mut sent = 0u32;

    for sample in samples {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let sample = match sample {
            Ok(s) => s,
            Err(e) => {
                warn!("WAV read error: {}", e);
                break;
            }
        };
        for frame in chunker.push(&[sample]) {
            // pace to real time
            let due = started + frame_time * sent;
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            }
            if stop.load(Ordering::Relaxed) {
                return;
            }
            if events
                .send(SessionEvent::MicFrame {
                    epoch,
                    samples: frame,
                })
                .is_err()
            {
                return;
            }
            sent += 1;
        }
    }

    if !stop.load(Ordering::Relaxed) {
        info!("WAV microphone reached end of file after {} frames", sent);
        let _ = events.send(SessionEvent::TrackEnded {
            epoch,
            kind: TrackKind::Microphone,
        });
    }
}

impl CaptureTrack for WavMicrophone {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for WavMicrophone {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Output-side scheduling for a blocking PCM sink.
///
/// The playout thread owns the device. Buffers wait in start-time order and
/// are written in 20 ms chunks once due; control commands are checked
/// between chunks and interrupt any wait, so a stop never sits behind a
/// queued or cancelled slot. A slot counts as finished at its end time on
/// the output clock, not when its last byte was handed to the device.
#[cfg(any(feature = "pulse", test))]
mod playout {
    use super::*;
    use crate::playback::OUTPUT_SAMPLE_RATE;
    use std::collections::VecDeque;
    use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};

    /// 20 ms of 24 kHz mono PCM16
    const WRITE_CHUNK: usize = 960;
    /// How far ahead of its start time a slot is written, so back-to-back
    /// slots join without an underrun.
    const LEAD: Duration = Duration::from_millis(20);

    /// A device that accepts PCM16 and plays it in order.
    pub(super) trait PcmSink {
        /// Blocks while the device buffer is full.
        fn write(&mut self, pcm: &[u8]) -> std::result::Result<(), String>;
        /// Drop everything buffered but not yet heard.
        fn flush(&mut self);
    }

    pub(super) enum Command {
        Play { slot: u64, at: f64, pcm: Vec<u8> },
        Stop { slot: u64 },
        Shutdown,
    }

    struct Queued {
        slot: u64,
        due: Instant,
        pcm: Vec<u8>,
    }

    struct Writing {
        slot: u64,
        pcm: Vec<u8>,
        offset: usize,
        ends: Instant,
    }

    pub(super) struct Playout<S> {
        sink: S,
        opened: Instant,
        epoch: u64,
        events: EventSink,
        queued: VecDeque<Queued>,
        writing: Option<Writing>,
        /// Fully written slots, audible until their end time
        buffered: Vec<(u64, Instant)>,
    }

    fn pcm_duration(pcm: &[u8]) -> Duration {
        Duration::from_secs_f64(pcm.len() as f64 / 2.0 / OUTPUT_SAMPLE_RATE as f64)
    }

    impl<S: PcmSink> Playout<S> {
        pub(super) fn new(sink: S, opened: Instant, epoch: u64, events: EventSink) -> Self {
            Self {
                sink,
                opened,
                epoch,
                events,
                queued: VecDeque::new(),
                writing: None,
                buffered: Vec::new(),
            }
        }

        pub(super) fn run(mut self, commands: Receiver<Command>) {
            loop {
                loop {
                    match commands.try_recv() {
                        Ok(command) => {
                            if !self.apply(command) {
                                return self.sink.flush();
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => return self.sink.flush(),
                    }
                }

                let now = Instant::now();
                self.report_finished(now);
                if self.write_next(now) {
                    continue;
                }

                let next = match self.next_wakeup() {
                    Some(at) => commands.recv_timeout(at.saturating_duration_since(now)),
                    None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match next {
                    Ok(command) => {
                        if !self.apply(command) {
                            return self.sink.flush();
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return self.sink.flush(),
                }
            }
        }

        /// False on shutdown.
        fn apply(&mut self, command: Command) -> bool {
            match command {
                Command::Play { slot, at, pcm } => {
                    let due = self.opened + Duration::from_secs_f64(at.max(0.0));
                    let pos = self.queued.partition_point(|q| q.due <= due);
                    self.queued.insert(pos, Queued { slot, due, pcm });
                }
                Command::Stop { slot } => self.stop(slot),
                Command::Shutdown => return false,
            }
            true
        }

        fn stop(&mut self, slot: u64) {
            self.queued.retain(|q| q.slot != slot);

            let was_writing = self.writing.as_ref().is_some_and(|w| w.slot == slot);
            let was_buffered = self.buffered.iter().any(|(s, _)| *s == slot);
            if !was_writing && !was_buffered {
                return;
            }
            if was_writing {
                self.writing = None;
            }
            self.buffered.retain(|(s, _)| *s != slot);
            self.sink.flush();

            // the flush cut whatever else was still in the device buffer
            for (other, _) in std::mem::take(&mut self.buffered) {
                self.ended(other);
            }
            if let Some(w) = self.writing.as_mut() {
                w.ends = Instant::now() + pcm_duration(&w.pcm[w.offset..]);
            }
        }

        fn report_finished(&mut self, now: Instant) {
            let mut finished = Vec::new();
            self.buffered.retain(|(slot, ends)| {
                let done = *ends <= now;
                if done {
                    finished.push(*slot);
                }
                !done
            });
            for slot in finished {
                self.ended(slot);
            }
        }

        /// Write one chunk if anything is due. False when idle.
        fn write_next(&mut self, now: Instant) -> bool {
            if self.writing.is_none() {
                match self.queued.front() {
                    Some(q) if q.due <= now + LEAD => {}
                    _ => return false,
                }
                let Some(q) = self.queued.pop_front() else {
                    return false;
                };
                let ends = q.due.max(now) + pcm_duration(&q.pcm);
                self.writing = Some(Writing {
                    slot: q.slot,
                    pcm: q.pcm,
                    offset: 0,
                    ends,
                });
            }
            let Some(w) = self.writing.as_mut() else {
                return false;
            };

            let end = (w.offset + WRITE_CHUNK).min(w.pcm.len());
            if let Err(e) = self.sink.write(&w.pcm[w.offset..end]) {
                warn!("Playback write failed: {}", e);
                let slot = w.slot;
                self.writing = None;
                self.ended(slot);
                return true;
            }
            w.offset = end;
            if w.offset >= w.pcm.len() {
                self.buffered.push((w.slot, w.ends));
                self.writing = None;
            }
            true
        }

        fn next_wakeup(&self) -> Option<Instant> {
            let due = self.queued.front().map(|q| q.due.checked_sub(LEAD).unwrap_or(q.due));
            let ends = self.buffered.iter().map(|(_, ends)| *ends).min();
            match (due, ends) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        }

        fn ended(&self, slot: u64) {
            let _ = self.events.send(SessionEvent::PlaybackEnded {
                epoch: self.epoch,
                slot,
            });
        }
    }
}

#[cfg(feature = "pulse")]
pub use pulse::{PulseMicrophone, PulseOutput};

#[cfg(feature = "pulse")]
mod pulse {
    use super::playout::{Command, PcmSink, Playout};
    use super::*;
    use crate::pcm::{self, AudioBuffer};
    use crate::playback::{AudioOutput, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
    use libpulse_binding::sample::{Format, Spec};
    use libpulse_binding::stream::Direction;
    use libpulse_simple_binding::Simple;
    use std::sync::mpsc as std_mpsc;

    const APP_NAME: &str = "livelens";

    /// Deferred stream open, run on the device thread.
    fn open_stream(
        direction: Direction,
        rate: u32,
        name: &'static str,
    ) -> impl FnOnce() -> std::result::Result<Simple, String> {
        move || {
            let spec = Spec {
                format: Format::S16le,
                channels: 1,
                rate,
            };
            Simple::new(None, APP_NAME, direction, None, name, &spec, None, None)
                .map_err(|e| e.to_string())
        }
    }

    /// Default PulseAudio source, 16 kHz mono.
    pub struct PulseMicrophone {
        stop: Arc<AtomicBool>,
    }

    impl PulseMicrophone {
        pub fn open(epoch: u64, events: EventSink) -> Result<Self> {
            let stop = Arc::new(AtomicBool::new(false));
            let stop_flag = stop.clone();
            let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
            let connect = open_stream(Direction::Record, INPUT_SAMPLE_RATE, "microphone");

            std::thread::Builder::new()
                .name("pulse-mic".into())
                .spawn(move || {
                    let simple = match connect() {
                        Ok(s) => {
                            let _ = ready_tx.send(Ok(()));
                            s
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let mut buf = vec![0u8; FRAME_SAMPLES * 2];
                    while !stop_flag.load(Ordering::Relaxed) {
                        if let Err(e) = simple.read(&mut buf) {
                            warn!("Microphone read failed: {}", e);
                            let _ = events.send(SessionEvent::TrackEnded {
                                epoch,
                                kind: TrackKind::Microphone,
                            });
                            break;
                        }
                        if stop_flag.load(Ordering::Relaxed) {
                            break;
                        }
                        let samples = pcm::decode(&buf);
                        if events.send(SessionEvent::MicFrame { epoch, samples }).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| SessionError::media(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    info!("🎙️  PulseAudio microphone open ({} Hz mono)", INPUT_SAMPLE_RATE);
                    Ok(Self { stop })
                }
                Ok(Err(e)) => Err(SessionError::media(format!("microphone: {}", e))),
                Err(_) => Err(SessionError::media("microphone thread exited")),
            }
        }
    }

    impl CaptureTrack for PulseMicrophone {
        fn stop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
        }
    }

    impl Drop for PulseMicrophone {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
        }
    }

    struct PulseSink(Simple);

    impl PcmSink for PulseSink {
        fn write(&mut self, pcm: &[u8]) -> std::result::Result<(), String> {
            self.0.write(pcm).map_err(|e| e.to_string())
        }

        fn flush(&mut self) {
            if let Err(e) = self.0.flush() {
                warn!("Playback flush failed: {}", e);
            }
        }
    }

    /// Default PulseAudio sink, 24 kHz mono.
    pub struct PulseOutput {
        opened: Instant,
        commands: std_mpsc::Sender<Command>,
    }

    impl PulseOutput {
        pub fn open(epoch: u64, events: EventSink) -> Result<Self> {
            let (commands, rx) = std_mpsc::channel::<Command>();
            let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
            let connect = open_stream(Direction::Playback, OUTPUT_SAMPLE_RATE, "playback");
            let opened = Instant::now();

            std::thread::Builder::new()
                .name("pulse-out".into())
                .spawn(move || {
                    let simple = match connect() {
                        Ok(s) => {
                            let _ = ready_tx.send(Ok(()));
                            s
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    Playout::new(PulseSink(simple), opened, epoch, events).run(rx);
                })
                .map_err(|e| SessionError::media(e.to_string()))?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    info!("🔊 PulseAudio output open ({} Hz mono)", OUTPUT_SAMPLE_RATE);
                    Ok(Self { opened, commands })
                }
                Ok(Err(e)) => Err(SessionError::media(format!("audio output: {}", e))),
                Err(_) => Err(SessionError::media("audio output thread exited")),
            }
        }
    }

    impl AudioOutput for PulseOutput {
        fn current_time(&self) -> f64 {
            self.opened.elapsed().as_secs_f64()
        }

        fn play(&mut self, slot: u64, buffer: AudioBuffer, at: f64) -> Result<()> {
            if buffer.channel_count() != OUTPUT_CHANNELS || buffer.sample_rate() != OUTPUT_SAMPLE_RATE {
                return Err(SessionError::decode(format!(
                    "output expects {} Hz x{}",
                    OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS
                )));
            }
            self.commands
                .send(Command::Play {
                    slot,
                    at,
                    pcm: pcm::encode(&buffer.interleaved()),
                })
                .map_err(|_| SessionError::send("audio output thread is gone"))
        }

        fn stop(&mut self, slot: u64) {
            let _ = self.commands.send(Command::Stop { slot });
        }

        fn close(&mut self) {
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..samples {
            writer.write_sample(((i % 100) as i16) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn wav_microphone_emits_frames_then_ends() {
        let path = std::env::temp_dir().join(format!("livelens-mic-{}.wav", std::process::id()));
        write_wav(&path, INPUT_SAMPLE_RATE, 1, FRAME_SAMPLES * 2 + 10);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _mic = WavMicrophone::open(&path, 3, tx).unwrap();

        let mut frames = 0;
        loop {
            match rx.recv().await.unwrap() {
                SessionEvent::MicFrame { epoch, samples } => {
                    assert_eq!(epoch, 3);
                    assert_eq!(samples.len(), FRAME_SAMPLES);
                    frames += 1;
                }
                SessionEvent::TrackEnded { kind, .. } => {
                    assert_eq!(kind, TrackKind::Microphone);
                    break;
                }
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        assert_eq!(frames, 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn wav_with_wrong_rate_is_rejected() {
        let path = std::env::temp_dir().join(format!("livelens-44k-{}.wav", std::process::id()));
        write_wav(&path, 44_100, 2, 100);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            WavMicrophone::open(&path, 1, tx),
            Err(SessionError::MediaAcquisitionFailed(_))
        ));
        let _ = std::fs::remove_file(&path);
    }

    mod playout_timing {
        use super::super::playout::{Command, PcmSink, Playout};
        use super::*;
        use std::sync::mpsc as std_mpsc;
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct FakeSink {
            /// (when, first byte) per written chunk
            writes: Arc<Mutex<Vec<(Instant, u8)>>>,
            flushes: Arc<Mutex<u32>>,
        }

        impl PcmSink for FakeSink {
            fn write(&mut self, pcm: &[u8]) -> std::result::Result<(), String> {
                self.writes.lock().unwrap().push((Instant::now(), pcm[0]));
                Ok(())
            }

            fn flush(&mut self) {
                *self.flushes.lock().unwrap() += 1;
            }
        }

        /// `ms` of 24 kHz PCM16 filled with `byte`
        fn tone(ms: usize, byte: u8) -> Vec<u8> {
            vec![byte; ms * 48]
        }

        fn start(
            sink: &FakeSink,
        ) -> (
            Instant,
            std_mpsc::Sender<Command>,
            mpsc::UnboundedReceiver<SessionEvent>,
            std::thread::JoinHandle<()>,
        ) {
            let (events, rx) = mpsc::unbounded_channel();
            let (commands, command_rx) = std_mpsc::channel();
            let opened = Instant::now();
            let sink = sink.clone();
            let worker =
                std::thread::spawn(move || Playout::new(sink, opened, 5, events).run(command_rx));
            (opened, commands, rx, worker)
        }

        fn ended_slots(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<u64> {
            let mut slots = Vec::new();
            while let Ok(event) = rx.try_recv() {
                match event {
                    SessionEvent::PlaybackEnded { epoch: 5, slot } => slots.push(slot),
                    other => panic!("Unexpected event: {:?}", other),
                }
            }
            slots
        }

        #[test]
        fn stop_flushes_and_skips_cancelled_backlog() {
            let sink = FakeSink::default();
            let (opened, commands, mut rx, worker) = start(&sink);

            // three back-to-back one second slots
            for (slot, at, byte) in [(1, 0.0, 0x11), (2, 1.0, 0x22), (3, 2.0, 0x33)] {
                commands
                    .send(Command::Play {
                        slot,
                        at,
                        pcm: tone(1000, byte),
                    })
                    .unwrap();
            }
            std::thread::sleep(Duration::from_millis(100));
            for slot in 1..=3 {
                commands.send(Command::Stop { slot }).unwrap();
            }
            commands
                .send(Command::Play {
                    slot: 4,
                    at: 0.15,
                    pcm: tone(50, 0x44),
                })
                .unwrap();
            std::thread::sleep(Duration::from_millis(400));
            commands.send(Command::Shutdown).unwrap();
            worker.join().unwrap();

            assert!(*sink.flushes.lock().unwrap() >= 1);
            let writes = sink.writes.lock().unwrap();
            assert!(writes.iter().all(|(_, b)| *b != 0x22 && *b != 0x33));
            let (written_at, _) = writes
                .iter()
                .find(|(_, b)| *b == 0x44)
                .expect("slot scheduled after the stop was never written");
            assert!(*written_at - opened < Duration::from_millis(400));
            assert_eq!(ended_slots(&mut rx), vec![4]);
        }

        #[test]
        fn completion_waits_for_end_time() {
            let sink = FakeSink::default();
            let (_, commands, mut rx, worker) = start(&sink);
            commands
                .send(Command::Play {
                    slot: 1,
                    at: 0.0,
                    pcm: tone(300, 0x11),
                })
                .unwrap();

            std::thread::sleep(Duration::from_millis(100));
            // fully handed to the device already, but still audible
            assert_eq!(sink.writes.lock().unwrap().len(), 300 / 20);
            assert!(ended_slots(&mut rx).is_empty());

            std::thread::sleep(Duration::from_millis(400));
            assert_eq!(ended_slots(&mut rx), vec![1]);
            commands.send(Command::Shutdown).unwrap();
            worker.join().unwrap();
        }

        #[test]
        fn back_to_back_slots_play_in_order() {
            let sink = FakeSink::default();
            let (_, commands, mut rx, worker) = start(&sink);
            for (slot, at, byte) in [(2, 0.05, 0x22), (1, 0.0, 0x11)] {
                commands
                    .send(Command::Play {
                        slot,
                        at,
                        pcm: tone(50, byte),
                    })
                    .unwrap();
            }
            std::thread::sleep(Duration::from_millis(300));
            drop(commands);
            worker.join().unwrap();

            let order: Vec<u8> = sink.writes.lock().unwrap().iter().map(|(_, b)| *b).collect();
            assert_eq!(order, vec![0x11, 0x11, 0x11, 0x22, 0x22, 0x22]);
            assert_eq!(ended_slots(&mut rx), vec![1, 2]);
        }
    }
}
