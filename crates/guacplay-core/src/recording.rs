//! Session recording playback engine.
//!
//! [`SessionRecording`] ties the pieces together: it spawns a background
//! ingest task that indexes the blob into frames, and serves play, pause,
//! and seek against the table built so far while ingest is still running.
//!
//! # Concurrency discipline
//!
//! Engine state is partitioned three ways:
//!
//! - the frame table, behind an `RwLock`, append-only from ingest;
//! - player state (current frame, playback clocks, seek tokens), behind a
//!   mutex held only for short non-awaiting sections;
//! - the display client and its snapshot table, behind an async mutex held
//!   across a frame's replay, so instruction dispatch for one frame is
//!   never interleaved with another.
//!
//! Suspension points are source reads, `export_state`, and delay timers.
//! Every replay pass carries a seek token; allocating a new token aborts
//! the previous pass, which notices at its next suspension point and stops
//! silently. Pause aborts the token of whatever pass is in flight, which
//! is also how the real-time playback loop is stopped mid-sleep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::client::DisplayClient;
use crate::error::Result;
use crate::events::{EventReceiver, EventSender, RecordingEvent};
use crate::index::{
    Frame, FrameIndex, Indexer, KEYFRAME_CHAR_INTERVAL, KEYFRAME_TIME_INTERVAL,
};
use crate::parser::InstructionParser;
use crate::source::{RecordingSource, BLOCK_SIZE};
use crate::tunnel::PlaybackTunnel;

/// Tuning knobs for ingest and keyframe placement.
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    /// Chunk size for background ingest, in code points.
    pub block_size: usize,
    /// Minimum stream distance between keyframes, in code points.
    pub keyframe_char_interval: usize,
    /// Minimum recording-time distance between keyframes, in ms.
    pub keyframe_time_interval: u64,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            keyframe_char_interval: KEYFRAME_CHAR_INTERVAL,
            keyframe_time_interval: KEYFRAME_TIME_INTERVAL,
        }
    }
}

/// Summary information about a recording.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingInfo {
    pub duration_ms: u64,
    pub frame_count: usize,
    pub keyframe_count: usize,
    /// Offset one past the last indexed frame, in code points.
    pub indexed: usize,
    /// Source size at the time of the call.
    pub source_size: usize,
}

/// Cancellation token for one replay pass. A new pass replaces the prior
/// token; the superseded pass observes the flag at its next suspension
/// point and stops without completing.
#[derive(Debug, Default)]
struct SeekToken {
    aborted: AtomicBool,
}

impl SeekToken {
    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Completion bookkeeping for the outermost user seek.
struct PendingSeek {
    /// Whether playback should resume once the seek lands.
    resume: bool,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct PlayerState {
    /// Last fully rendered frame; `None` before anything is shown.
    current: Option<usize>,
    /// Recording-time anchor of the current play run; present iff playing.
    start_video_ts: Option<u64>,
    /// Wall-clock anchor of the current play run; present iff playing.
    start_real: Option<Instant>,
    active_seek: Option<Arc<SeekToken>>,
    pending_seek: Option<PendingSeek>,
    /// Generation counter; superseded playback loops exit on mismatch.
    play_run: u64,
}

struct DisplaySide<C: DisplayClient> {
    tunnel: PlaybackTunnel<C>,
    /// Keyframe snapshots, keyed by frame index. An entry exists only for
    /// keyframe-eligible frames, populated on first replay.
    snapshots: HashMap<usize, C::State>,
}

struct Inner<C: DisplayClient> {
    source: Arc<dyn RecordingSource>,
    options: PlaybackOptions,
    index: RwLock<FrameIndex>,
    player: Mutex<PlayerState>,
    display: AsyncMutex<DisplaySide<C>>,
    events: EventSender,
    ingest_aborted: AtomicBool,
}

/// A loaded session recording and its playback engine.
///
/// Construction connects the display client (cursor hidden) and spawns
/// background ingest; the returned [`EventReceiver`] carries every engine
/// event in emission order. All operations degrade gracefully while the
/// frame table is still empty. Dropping the recording silently stops
/// ingest and playback.
///
/// Must be used within a tokio runtime.
pub struct SessionRecording<C: DisplayClient> {
    inner: Arc<Inner<C>>,
}

impl<C: DisplayClient> SessionRecording<C> {
    /// Start ingesting `source`, driving `client` during playback.
    pub fn new(source: Arc<dyn RecordingSource>, client: C) -> (Self, EventReceiver) {
        Self::with_options(source, client, PlaybackOptions::default())
    }

    pub fn with_options(
        source: Arc<dyn RecordingSource>,
        client: C,
        options: PlaybackOptions,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            index: RwLock::new(FrameIndex::with_intervals(
                options.keyframe_char_interval,
                options.keyframe_time_interval,
            )),
            player: Mutex::new(PlayerState::default()),
            display: AsyncMutex::new(DisplaySide {
                tunnel: PlaybackTunnel::new(client),
                snapshots: HashMap::new(),
            }),
            source,
            options,
            events,
            ingest_aborted: AtomicBool::new(false),
        });
        tokio::spawn(Inner::run_ingest(Arc::clone(&inner)));
        (Self { inner }, receiver)
    }

    /// Whether playback is currently running.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.inner.player.lock().start_video_ts.is_some()
    }

    /// Position of the current frame, in ms from the recording start. Zero
    /// before anything has been rendered.
    #[must_use]
    pub fn position(&self) -> u64 {
        let player = self.inner.player.lock();
        match player.current {
            None => 0,
            Some(i) => {
                let index = self.inner.index.read();
                index
                    .get(i)
                    .map_or(0, |frame| index.relative(frame.timestamp))
            }
        }
    }

    /// Duration indexed so far, in ms. Grows while ingest runs.
    #[must_use]
    pub fn duration(&self) -> u64 {
        self.inner.index.read().duration()
    }

    /// Number of frames indexed so far.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.inner.index.read().len()
    }

    /// Snapshot of the frame table indexed so far.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.inner.index.read().frames().to_vec()
    }

    /// Summary of the recording as indexed so far.
    #[must_use]
    pub fn info(&self) -> RecordingInfo {
        let index = self.inner.index.read();
        let frames = index.frames();
        RecordingInfo {
            duration_ms: index.duration(),
            frame_count: frames.len(),
            keyframe_count: frames.iter().filter(|f| f.keyframe).count(),
            indexed: frames.last().map_or(0, |f| f.end),
            source_size: self.inner.source.size(),
        }
    }

    /// Start playback from the frame after the current one. No-op while
    /// already playing, or when no further frame exists yet.
    pub fn play(&self) {
        Inner::play(&self.inner);
    }

    /// Stop playback and abort any replay pass in flight. Idempotent.
    pub fn pause(&self) {
        Inner::pause(&self.inner);
    }

    /// Move playback to `position` ms from the recording start, replaying
    /// from the nearest usable baseline. Resolves once the target frame is
    /// rendered, or once the seek is cancelled or superseded. If playback
    /// was running when the seek began, it resumes before this resolves.
    pub async fn seek(&self, position: u64) {
        Inner::seek(Arc::clone(&self.inner), position).await;
    }

    /// Cancel an in-flight user seek, completing it immediately. No-op if
    /// none is outstanding.
    pub fn cancel(&self) {
        Inner::cancel(&self.inner);
    }

    /// Stop ingest permanently. Frames already indexed remain playable.
    /// Emits [`RecordingEvent::Abort`] exactly once.
    pub fn abort(&self) {
        if !self.inner.ingest_aborted.swap(true, Ordering::SeqCst) {
            debug!("recording load aborted");
            self.inner.emit(RecordingEvent::Abort);
        }
    }

    /// Run `f` against the display client, under the display lock.
    pub async fn with_display<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        let mut display = self.inner.display.lock().await;
        f(display.tunnel.client_mut())
    }
}

impl<C: DisplayClient> Drop for SessionRecording<C> {
    fn drop(&mut self) {
        self.inner.ingest_aborted.store(true, Ordering::SeqCst);
        let mut player = self.inner.player.lock();
        if let Some(token) = player.active_seek.take() {
            token.abort();
        }
        player.start_video_ts = None;
        player.start_real = None;
        player.play_run += 1;
        // Dropping the completion sender wakes any task awaiting the seek.
        player.pending_seek = None;
    }
}

impl<C: DisplayClient> Inner<C> {
    fn emit(&self, event: RecordingEvent) {
        let _ = self.events.send(event);
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    async fn run_ingest(inner: Arc<Self>) {
        let mut indexer = Indexer::new();
        let mut offset = 0usize;

        loop {
            if inner.ingest_aborted.load(Ordering::SeqCst) {
                debug!(offset, "ingest stopped by abort");
                return;
            }
            let size = inner.source.size();
            if offset >= size {
                break;
            }
            let end = (offset + inner.options.block_size).min(size);
            let chunk = match inner.source.read(offset, end).await {
                Ok(chunk) => chunk,
                Err(err) => {
                    warn!(offset, %err, "ingest read failed");
                    inner.emit(RecordingEvent::Error {
                        message: err.to_string(),
                    });
                    return;
                }
            };
            indexer.feed(&chunk);

            loop {
                let stepped = {
                    let mut index = inner.index.write();
                    match indexer.next_frame(&mut index) {
                        Ok(Some(frame)) => {
                            Some((index.relative(frame.timestamp), frame.end))
                        }
                        Ok(None) => None,
                        Err(err) => {
                            drop(index);
                            warn!(%err, "ingest stopped by parse failure");
                            inner.emit(RecordingEvent::Error {
                                message: err.to_string(),
                            });
                            return;
                        }
                    }
                };
                match stepped {
                    Some((duration_ms, parsed)) => {
                        inner.emit(RecordingEvent::Progress {
                            duration_ms,
                            parsed,
                        });
                    }
                    None => break,
                }
            }
            offset = end;
        }

        if indexer.has_pending_input() {
            warn!("recording ends mid-instruction; trailing input ignored");
        }
        debug!(frames = inner.index.read().len(), "ingest complete");
        inner.emit(RecordingEvent::Load);
    }

    // -----------------------------------------------------------------------
    // Play / pause
    // -----------------------------------------------------------------------

    fn play(inner: &Arc<Self>) {
        let run = {
            let mut player = inner.player.lock();
            if player.start_video_ts.is_some() {
                return;
            }
            let next = player.current.map_or(0, |i| i + 1);
            let Some(frame) = inner.index.read().get(next).cloned() else {
                return;
            };
            inner.emit(RecordingEvent::Play);
            player.start_video_ts = Some(frame.timestamp);
            player.start_real = Some(Instant::now());
            player.play_run += 1;
            player.play_run
        };
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            Self::playback_loop(inner, run).await;
        });
    }

    fn pause(inner: &Arc<Self>) {
        let mut player = inner.player.lock();
        if let Some(token) = player.active_seek.take() {
            token.abort();
        }
        if player.start_video_ts.is_some() {
            player.start_video_ts = None;
            player.start_real = None;
            inner.emit(RecordingEvent::Pause);
        }
    }

    /// Real-time scheduler: advance frame by frame, sleeping out the
    /// recording-time gaps. When the page stalls, missed frames advance
    /// with zero delay until real time is caught up again.
    async fn playback_loop(inner: Arc<Self>, run: u64) {
        loop {
            let step = {
                let mut player = inner.player.lock();
                if player.play_run != run {
                    return;
                }
                let (Some(video_anchor), Some(real_anchor)) =
                    (player.start_video_ts, player.start_real)
                else {
                    return;
                };
                let next = player.current.map_or(0, |i| i + 1);
                match inner.index.read().get(next) {
                    None => None,
                    Some(frame) => {
                        let elapsed = real_anchor.elapsed().as_millis() as u64;
                        let delay = frame
                            .timestamp
                            .saturating_sub(video_anchor)
                            .saturating_sub(elapsed);
                        let token = Self::new_seek_token(&mut player);
                        Some((next, delay, token))
                    }
                }
            };

            let Some((target, delay, token)) = step else {
                // Clean end of the indexed stream.
                Self::pause(&inner);
                return;
            };

            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if token.is_aborted() {
                return;
            }
            match Self::seek_to_frame(&inner, target, &token).await {
                Ok(()) => {}
                Err(err) => {
                    warn!(%err, frame = target, "playback stopped by replay failure");
                    inner.emit(RecordingEvent::Error {
                        message: err.to_string(),
                    });
                    Self::pause(&inner);
                    return;
                }
            }
            if token.is_aborted() {
                return;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Seeking
    // -----------------------------------------------------------------------

    fn new_seek_token(player: &mut PlayerState) -> Arc<SeekToken> {
        if let Some(prior) = player.active_seek.take() {
            prior.abort();
        }
        let token = Arc::new(SeekToken::default());
        player.active_seek = Some(Arc::clone(&token));
        token
    }

    async fn seek(inner: Arc<Self>, position: u64) {
        if inner.index.read().is_empty() {
            return;
        }
        // Terminate any outstanding user seek, completing it now.
        Self::cancel(&inner);

        let resume = inner.player.lock().start_video_ts.is_some();
        Self::pause(&inner);

        let Some(target) = inner.index.read().find(position) else {
            return;
        };
        trace!(position, target, resume, "seek");

        let (done_tx, done_rx) = oneshot::channel();
        let token = {
            let mut player = inner.player.lock();
            player.pending_seek = Some(PendingSeek {
                resume,
                done: done_tx,
            });
            Self::new_seek_token(&mut player)
        };

        {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                if let Err(err) = Self::seek_to_frame(&inner, target, &token).await {
                    warn!(%err, frame = target, "seek stopped by replay failure");
                    inner.emit(RecordingEvent::Error {
                        message: err.to_string(),
                    });
                }
                let pending = {
                    let mut player = inner.player.lock();
                    if token.is_aborted() {
                        None
                    } else {
                        player.active_seek = None;
                        player.pending_seek.take()
                    }
                };
                if let Some(pending) = pending {
                    Self::finish_seek(&inner, pending);
                }
            });
        }

        // Resolved by the replay pass reaching the target, by `cancel`, or
        // by the engine being dropped.
        let _ = done_rx.await;
    }

    fn cancel(inner: &Arc<Self>) {
        let pending = {
            let mut player = inner.player.lock();
            if player.pending_seek.is_none() {
                return;
            }
            if let Some(token) = player.active_seek.take() {
                token.abort();
            }
            player.pending_seek.take()
        };
        if let Some(pending) = pending {
            Self::finish_seek(inner, pending);
        }
    }

    /// Complete a user seek: restore playback if it was running when the
    /// seek began, then resolve the caller. Runs exactly once per seek,
    /// from whichever party terminates it.
    fn finish_seek(inner: &Arc<Self>, pending: PendingSeek) {
        if pending.resume {
            Self::play(inner);
        }
        let _ = pending.done.send(());
    }

    /// Bring the display to `target`: restore the nearest usable baseline,
    /// then replay forward one frame at a time, reporting progress and
    /// honouring `token` at every suspension point.
    async fn seek_to_frame(inner: &Arc<Self>, target: usize, token: &Arc<SeekToken>) -> Result<()> {
        // Establish the baseline: the display's current frame, the nearest
        // stored snapshot at or before the target, or a blank display.
        let start_index = {
            let mut display = inner.display.lock().await;
            if token.is_aborted() {
                return Ok(());
            }
            let DisplaySide { tunnel, snapshots } = &mut *display;
            let mut player = inner.player.lock();
            let mut idx = target;
            loop {
                if player.current == Some(idx) {
                    break idx;
                }
                if let Some(state) = snapshots.get(&idx) {
                    tunnel.client_mut().import_state(state);
                    player.current = Some(idx);
                    trace!(restored = idx, "restored keyframe snapshot");
                    break idx;
                }
                if idx == 0 {
                    if player.current.is_some() {
                        // The display sits past the target with no snapshot
                        // to fall back on; reconnect returns the client to
                        // its blank initial state so replay can rebuild.
                        tunnel.client_mut().connect();
                        tunnel.client_mut().show_cursor(false);
                        player.current = None;
                    }
                    break 0;
                }
                idx -= 1;
            }
        };

        loop {
            let next = {
                let player = inner.player.lock();
                let index = inner.index.read();
                if let Some(current) = player.current {
                    if current > start_index {
                        if let Some(frame) = index.get(current) {
                            inner.emit(RecordingEvent::Seek {
                                position_ms: index.relative(frame.timestamp),
                                step: current - start_index,
                                total: target - start_index,
                            });
                        }
                    }
                }
                if token.is_aborted() {
                    return Ok(());
                }
                match player.current {
                    Some(current) if current >= target => None,
                    Some(current) => Some(current + 1),
                    None => Some(0),
                }
            };
            match next {
                None => return Ok(()),
                Some(frame_index) => {
                    if !Self::replay_frame(inner, frame_index, token).await? {
                        // Aborted mid-replay; nothing was applied.
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Replay one frame: re-read its byte range, re-parse it with a fresh
    /// parser, feed every instruction through the tunnel, and capture a
    /// keyframe snapshot if the frame is eligible and has none yet.
    ///
    /// Returns `false` when the token aborted before any instruction was
    /// applied; the display and `current` are then untouched.
    async fn replay_frame(
        inner: &Arc<Self>,
        frame_index: usize,
        token: &Arc<SeekToken>,
    ) -> Result<bool> {
        let Some(frame) = inner.index.read().get(frame_index).cloned() else {
            return Ok(false);
        };
        let text = inner.source.read(frame.start, frame.end).await?;

        let mut display = inner.display.lock().await;
        if token.is_aborted() {
            return Ok(false);
        }
        let DisplaySide { tunnel, snapshots } = &mut *display;

        let mut parser = InstructionParser::new();
        parser.feed(&text);
        while let Some(instruction) = parser.next_instruction()? {
            tunnel.receive_instruction(&instruction);
        }
        if !parser.is_idle() {
            warn!(frame = frame_index, "frame range ended mid-instruction");
        }

        if frame.keyframe && !snapshots.contains_key(&frame_index) {
            trace!(frame = frame_index, "capturing keyframe snapshot");
            let state = tunnel.client_mut().export_state().await;
            snapshots.insert(frame_index, state);
        }

        // Advance `current` before releasing the display lock, so a pass
        // waiting on the lock never observes a frame applied but not yet
        // recorded.
        inner.player.lock().current = Some(frame_index);
        drop(display);
        Ok(true)
    }
}
