//! Frame table construction and timestamp search.
//!
//! The indexer walks the recording once, in the background, splitting the
//! instruction stream on `sync` boundaries. Each frame records the byte
//! range that produces it and the millisecond timestamp of its terminating
//! `sync`. Frames far enough from the previous keyframe (in both stream
//! distance and recording time) are flagged as keyframe candidates; the
//! playback engine captures a display snapshot at those frames on first
//! replay so later seeks can start from the nearest snapshot instead of
//! the top of the stream.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::parser::{Instruction, InstructionParser, SYNC_OPCODE};

/// Minimum stream distance between consecutive keyframes, in code points.
pub const KEYFRAME_CHAR_INTERVAL: usize = 16_384;

/// Minimum recording-time distance between consecutive keyframes, in ms.
pub const KEYFRAME_TIME_INTERVAL: u64 = 5_000;

/// One renderable frame: the instructions in `[start, end)`, terminated by
/// exactly one `sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    /// Millisecond timestamp from the terminating `sync`. Non-decreasing
    /// across the frame sequence.
    pub timestamp: u64,
    /// Start offset within the blob, in code points.
    pub start: usize,
    /// End offset (exclusive), including the terminating `sync`.
    pub end: usize,
    /// Whether this frame may carry a display-state snapshot.
    pub keyframe: bool,
}

/// Append-only table of indexed frames.
#[derive(Debug)]
pub struct FrameIndex {
    frames: Vec<Frame>,
    last_keyframe: usize,
    char_interval: usize,
    time_interval: u64,
}

impl FrameIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::with_intervals(KEYFRAME_CHAR_INTERVAL, KEYFRAME_TIME_INTERVAL)
    }

    /// A frame index with custom keyframe spacing.
    #[must_use]
    pub fn with_intervals(char_interval: usize, time_interval: u64) -> Self {
        Self {
            frames: Vec::new(),
            last_keyframe: 0,
            char_interval,
            time_interval,
        }
    }

    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Index of the most recent keyframe-eligible frame.
    #[must_use]
    pub fn last_keyframe(&self) -> usize {
        self.last_keyframe
    }

    /// Append the frame ending at `end` with the given `sync` timestamp.
    ///
    /// The first frame is always keyframe-eligible; any other frame is
    /// flagged when its end sits at least `char_interval` code points past
    /// the last keyframe's start *and* its timestamp at least
    /// `time_interval` ms past the last keyframe's.
    pub fn push_sync(&mut self, timestamp: u64, start: usize, end: usize) -> &Frame {
        let keyframe = match self.frames.get(self.last_keyframe) {
            None => true,
            Some(anchor) => {
                end - anchor.start >= self.char_interval
                    && timestamp.saturating_sub(anchor.timestamp) >= self.time_interval
            }
        };
        if keyframe {
            self.last_keyframe = self.frames.len();
        }
        self.frames.push(Frame {
            timestamp,
            start,
            end,
            keyframe,
        });
        &self.frames[self.frames.len() - 1]
    }

    /// A timestamp's offset from the start of the recording.
    #[must_use]
    pub fn relative(&self, timestamp: u64) -> u64 {
        self.frames
            .first()
            .map_or(0, |first| timestamp.saturating_sub(first.timestamp))
    }

    /// Total indexed duration in ms. Grows as ingest proceeds.
    #[must_use]
    pub fn duration(&self) -> u64 {
        match (self.frames.first(), self.frames.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        }
    }

    /// Index of the frame whose timestamp is closest to `position` ms from
    /// the start of the recording; the lower index wins ties.
    #[must_use]
    pub fn find(&self, position: u64) -> Option<usize> {
        if self.frames.is_empty() {
            return None;
        }
        let target = self.frames[0].timestamp + position;

        // Last frame at or before the target; frame 0 always qualifies.
        let mut min = 0;
        let mut max = self.frames.len() - 1;
        while min < max {
            let mid = (min + max + 1) / 2;
            if self.frames[mid].timestamp > target {
                max = mid - 1;
            } else {
                min = mid;
            }
        }

        let below = target - self.frames[min].timestamp;
        if let Some(next) = self.frames.get(min + 1) {
            if next.timestamp - target < below {
                return Some(min + 1);
            }
        }
        Some(min)
    }
}

impl Default for FrameIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming indexer: drives the parser over ingest chunks and appends a
/// frame to the table at each `sync`.
#[derive(Debug)]
pub struct Indexer {
    parser: InstructionParser,
    frame_start: usize,
    frame_end: usize,
}

impl Indexer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parser: InstructionParser::new(),
            frame_start: 0,
            frame_end: 0,
        }
    }

    /// Append an ingest chunk. Drain completed frames with
    /// [`next_frame`](Self::next_frame).
    pub fn feed(&mut self, chunk: &str) {
        self.parser.feed(chunk);
    }

    /// Advance over buffered instructions up to the next `sync`, appending
    /// its frame to `index`.
    ///
    /// Returns `Ok(None)` when the buffered input holds no further complete
    /// frame. Instructions consumed before a parse failure have already
    /// advanced the cursor, so frames completed earlier in the chunk are
    /// preserved.
    ///
    /// # Errors
    ///
    /// Grammar errors from the parser, or [`Error::Parse`] when a `sync`
    /// carries a missing or non-integer timestamp.
    pub fn next_frame(&mut self, index: &mut FrameIndex) -> Result<Option<Frame>> {
        while let Some(instruction) = self.parser.next_instruction()? {
            self.frame_end += instruction.encoded_size();
            if instruction.opcode == SYNC_OPCODE {
                let timestamp = sync_timestamp(&instruction)?;
                let frame = index
                    .push_sync(timestamp, self.frame_start, self.frame_end)
                    .clone();
                self.frame_start = self.frame_end;
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    /// Offset one past the last fully parsed instruction.
    #[must_use]
    pub fn parsed(&self) -> usize {
        self.frame_end
    }

    /// Whether input remains buffered mid-instruction.
    #[must_use]
    pub fn has_pending_input(&self) -> bool {
        !self.parser.is_idle()
    }
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new()
    }
}

fn sync_timestamp(instruction: &Instruction) -> Result<u64> {
    let arg = instruction
        .args
        .first()
        .ok_or_else(|| Error::Parse("sync instruction missing its timestamp".into()))?;
    arg.parse()
        .map_err(|_| Error::Parse(format!("invalid sync timestamp {arg:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Wire-encode a `sync` frame, optionally preceded by a payload
    /// instruction padding the frame to a given size.
    fn sync_frame(timestamp: u64) -> String {
        let ts = timestamp.to_string();
        format!("4.sync,{}.{};", ts.len(), ts)
    }

    fn padding(value_len: usize) -> String {
        let value = "x".repeat(value_len);
        format!("4.blob,{}.{};", value_len, value)
    }

    fn index_all(input: &str) -> (FrameIndex, Result<()>) {
        let mut index = FrameIndex::new();
        let mut indexer = Indexer::new();
        indexer.feed(input);
        loop {
            match indexer.next_frame(&mut index) {
                Ok(Some(_)) => {}
                Ok(None) => return (index, Ok(())),
                Err(e) => return (index, Err(e)),
            }
        }
    }

    #[test]
    fn single_sync_frame() {
        let (index, res) = index_all("4.sync,4.1000;");
        res.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.frames()[0],
            Frame {
                timestamp: 1000,
                start: 0,
                end: 14,
                keyframe: true,
            }
        );
        assert_eq!(index.duration(), 0);
    }

    #[test]
    fn two_frames_share_boundary() {
        let (index, res) = index_all("4.sync,1.0;4.sync,4.2500;");
        res.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.frames()[0].end, 11);
        assert_eq!(index.frames()[1].start, 11);
        assert_eq!(index.frames()[1].end, 25);
        assert_eq!(index.duration(), 2500);
        assert!(index.frames()[0].keyframe);
        assert!(!index.frames()[1].keyframe);
    }

    #[test]
    fn non_sync_instructions_extend_the_frame() {
        let (index, res) = index_all("4.size,1.0,3.800,3.600;4.sync,1.0;");
        res.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.frames()[0].start, 0);
        assert_eq!(index.frames()[0].end, 23 + 11);
    }

    #[test]
    fn keyframe_requires_both_intervals() {
        // 100 tiny frames 100 ms apart: the char interval is never reached.
        let mut stream = String::new();
        for i in 0..100u64 {
            stream.push_str(&sync_frame(i * 100));
        }
        let (index, res) = index_all(&stream);
        res.unwrap();
        assert_eq!(index.len(), 100);
        assert_eq!(
            index.frames().iter().filter(|f| f.keyframe).count(),
            1,
            "only frame 0 is keyframe-eligible"
        );

        // A frame past both thresholds becomes eligible.
        stream.push_str(&padding(16_400));
        stream.push_str(&sync_frame(10_000));
        let (index, res) = index_all(&stream);
        res.unwrap();
        let last = index.frames().last().unwrap();
        assert!(last.keyframe);
        assert_eq!(index.last_keyframe(), index.len() - 1);
    }

    #[test]
    fn keyframe_needs_time_as_well_as_chars() {
        // Plenty of stream distance but only 100 ms apart.
        let stream = format!(
            "{}{}{}",
            sync_frame(0),
            padding(20_000),
            sync_frame(100)
        );
        let (index, res) = index_all(&stream);
        res.unwrap();
        assert!(!index.frames()[1].keyframe);
    }

    #[test]
    fn frames_survive_mid_chunk_parse_failure() {
        let (index, res) = index_all("4.sync,1.0;bogus");
        assert!(res.is_err());
        assert_eq!(index.len(), 1);
        assert_eq!(index.frames()[0].timestamp, 0);
    }

    #[test]
    fn sync_without_timestamp_is_a_parse_failure() {
        let (index, res) = index_all("4.sync;");
        assert!(matches!(res, Err(Error::Parse(_))));
        assert!(index.is_empty());
    }

    #[test]
    fn sync_with_garbage_timestamp_is_a_parse_failure() {
        let (index, res) = index_all("4.sync,3.abc;");
        assert!(matches!(res, Err(Error::Parse(_))));
        assert!(index.is_empty());
    }

    #[test]
    fn indexing_is_chunking_invariant() {
        let stream = format!(
            "{}{}{}{}",
            sync_frame(0),
            padding(500),
            sync_frame(700),
            sync_frame(900)
        );
        let (whole, res) = index_all(&stream);
        res.unwrap();

        let mut chunked = FrameIndex::new();
        let mut indexer = Indexer::new();
        let chars: Vec<char> = stream.chars().collect();
        for piece in chars.chunks(7) {
            indexer.feed(&piece.iter().collect::<String>());
            while indexer.next_frame(&mut chunked).unwrap().is_some() {}
        }
        assert_eq!(whole.frames(), chunked.frames());
    }

    #[test]
    fn find_prefers_exact_then_lower_on_tie() {
        let stream: String = (0..10u64).map(|i| sync_frame(i * 100)).collect();
        let (index, res) = index_all(&stream);
        res.unwrap();

        assert_eq!(index.find(0), Some(0));
        assert_eq!(index.find(400), Some(4));
        assert_eq!(index.find(450), Some(4)); // equidistant: lower wins
        assert_eq!(index.find(451), Some(5));
        assert_eq!(index.find(99_999), Some(9));
    }

    #[test]
    fn find_on_empty_index() {
        assert_eq!(FrameIndex::new().find(0), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 48,
            .. ProptestConfig::default()
        })]

        /// After full ingest: timestamps non-decreasing, frames adjacent,
        /// the table covers the whole stream, and keyframe spacing obeys
        /// the indexing rule.
        #[test]
        fn frame_table_invariants(
            gaps in prop::collection::vec((0u64..8_000, 0usize..4_000), 1..24)
        ) {
            let mut stream = String::new();
            let mut timestamp = 0u64;
            for (dt, pad) in &gaps {
                timestamp += dt;
                if *pad > 0 {
                    stream.push_str(&padding(*pad));
                }
                stream.push_str(&sync_frame(timestamp));
            }

            let (index, res) = index_all(&stream);
            res.unwrap();
            let frames = index.frames();
            prop_assert_eq!(frames.len(), gaps.len());
            prop_assert_eq!(frames[0].start, 0);
            prop_assert_eq!(frames[frames.len() - 1].end, stream.chars().count());

            let mut last_keyframe = 0usize;
            for i in 0..frames.len() {
                if i > 0 {
                    prop_assert!(frames[i - 1].timestamp <= frames[i].timestamp);
                    prop_assert_eq!(frames[i - 1].end, frames[i].start);
                    prop_assert_eq!(
                        frames[i].keyframe,
                        frames[i].end - frames[last_keyframe].start
                            >= KEYFRAME_CHAR_INTERVAL
                            && frames[i].timestamp - frames[last_keyframe].timestamp
                                >= KEYFRAME_TIME_INTERVAL
                    );
                } else {
                    prop_assert!(frames[0].keyframe);
                }
                if frames[i].keyframe {
                    last_keyframe = i;
                }
            }
        }

        /// `find` returns a closest frame, with the lower index on ties.
        #[test]
        fn find_minimises_distance(
            steps in prop::collection::vec(0u64..500, 1..16),
            position in 0u64..10_000
        ) {
            let mut stream = String::new();
            let mut timestamp = 0u64;
            for dt in &steps {
                timestamp += dt;
                stream.push_str(&sync_frame(timestamp));
            }
            let (index, res) = index_all(&stream);
            res.unwrap();

            let found = index.find(position).unwrap();
            let target = index.frames()[0].timestamp + position;
            let dist = |i: usize| {
                index.frames()[i].timestamp.abs_diff(target)
            };
            for i in 0..index.len() {
                prop_assert!(dist(found) <= dist(i));
                // On an exact tie across the target, the frame at or below
                // the target wins.
                if index.frames()[found].timestamp > target {
                    prop_assert!(
                        index.frames()[i].timestamp > target || dist(i) > dist(found)
                    );
                }
            }
        }
    }
}
