//! Single-slot, most-recent-wins exchange between capture and render

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use crossbeam::queue::ArrayQueue;
use crossbeam::utils::CachePadded;

use crate::transform::TransformedImage;

/// Boxes in circulation: one in the slot, one being filled by the producer.
const SPARE_SLOTS: usize = 2;

struct Published {
    sequence: u64,
    image: Option<TransformedImage>,
}

/// Mailbox holding at most one transformed image.
///
/// `publish` swaps a new image into the slot and drops whatever was there;
/// readers take ownership out of the slot. Both sides exchange a pointer
/// atomically, so a reader never sees a partially written image and the
/// producer never waits on the consumer. Emptied boxes go back to a spare
/// queue, so publishing allocates only until the spares are warm.
pub struct FrameHandoff {
    slot: AtomicCell<Option<Box<Published>>>,
    spare: ArrayQueue<Box<Published>>,
    allocated: AtomicU64,
    sequence: CachePadded<AtomicU64>,
    epoch: CachePadded<AtomicU64>,
    overwritten: AtomicU64,
}

impl Default for FrameHandoff {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHandoff {
    pub fn new() -> Self {
        Self {
            slot: AtomicCell::new(None),
            spare: ArrayQueue::new(SPARE_SLOTS),
            allocated: AtomicU64::new(0),
            sequence: CachePadded::new(AtomicU64::new(0)),
            epoch: CachePadded::new(AtomicU64::new(0)),
            overwritten: AtomicU64::new(0),
        }
    }

    /// Replace the slot contents, returning the new sequence number.
    pub fn publish(&self, image: TransformedImage) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let mut entry = self.spare.pop().unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            Box::new(Published {
                sequence: 0,
                image: None,
            })
        });
        entry.sequence = sequence;
        entry.image = Some(image);

        if let Some(previous) = self.slot.swap(Some(entry)) {
            self.recycle(previous);
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("edgeview_frames_dropped", "stage" => "handoff").increment(1);
        }
        sequence
    }

    /// Drop the image held by `entry` and keep the box for the next publish.
    fn recycle(&self, mut entry: Box<Published>) {
        entry.image = None;
        let _ = self.spare.push(entry);
    }

    /// Slot boxes allocated over the handoff's lifetime.
    pub fn slot_allocations(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Highest sequence number published so far.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Images replaced before anyone consumed them.
    pub fn overwritten(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }

    /// Drop any pending image and start a new epoch, telling readers that
    /// the session feeding this handoff has ended.
    pub fn reset(&self) {
        if let Some(entry) = self.slot.take() {
            self.recycle(entry);
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn reader(self: &Arc<Self>) -> HandoffReader {
        HandoffReader {
            handoff: Arc::clone(self),
            last_sequence: 0,
            epoch: self.epoch(),
        }
    }
}

/// Consumer side of a [`FrameHandoff`], remembering what it has already seen.
pub struct HandoffReader {
    handoff: Arc<FrameHandoff>,
    last_sequence: u64,
    epoch: u64,
}

impl HandoffReader {
    /// Take the pending image if it is newer than the last one this reader
    /// consumed. Never blocks.
    pub fn try_consume(&mut self) -> Option<TransformedImage> {
        let mut published = self.handoff.slot.take()?;
        let sequence = published.sequence;
        let image = published.image.take();
        self.handoff.recycle(published);
        if sequence <= self.last_sequence {
            return None;
        }
        self.last_sequence = sequence;
        image
    }

    /// Sequence number of the last image this reader consumed.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Returns `true` once per [`FrameHandoff::reset`] since the last call.
    pub fn poll_reset(&mut self) -> bool {
        let epoch = self.handoff.epoch();
        if epoch != self.epoch {
            self.epoch = epoch;
            true
        } else {
            false
        }
    }

    pub fn handoff(&self) -> &Arc<FrameHandoff> {
        &self.handoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
    use crate::transform::{EdgeParameters, ProcessingMode, TransformEngine};

    fn images(count: usize) -> Vec<TransformedImage> {
        let mut engine = TransformEngine::with_output_images(count);
        engine.init(4, 4).unwrap();
        (0..count as u64)
            .map(|sequence| {
                let frame = Frame::from_vec(
                    vec![100; 24],
                    FrameMetadata {
                        sequence,
                        width: 4,
                        height: 4,
                        format: PixelFormat::Nv21,
                        device_timestamp: None,
                    },
                );
                engine
                    .transform(&frame, ProcessingMode::Raw, EdgeParameters::default())
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn consume_once_then_empty() {
        let handoff = Arc::new(FrameHandoff::new());
        let mut reader = handoff.reader();
        let mut imgs = images(1);

        handoff.publish(imgs.pop().unwrap());
        assert!(reader.try_consume().is_some());
        assert!(reader.try_consume().is_none());
        assert_eq!(reader.last_sequence(), 1);
    }

    #[test]
    fn newest_wins() {
        let handoff = Arc::new(FrameHandoff::new());
        let mut reader = handoff.reader();
        for image in images(3) {
            handoff.publish(image);
        }
        let image = reader.try_consume().unwrap();
        assert_eq!(image.frame_sequence(), 2);
        assert_eq!(handoff.overwritten(), 2);
        assert_eq!(reader.last_sequence(), 3);
    }

    #[test]
    fn steady_state_reuses_slot_boxes() {
        let handoff = Arc::new(FrameHandoff::new());
        let mut reader = handoff.reader();
        let mut engine = TransformEngine::with_output_images(2);
        engine.init(4, 4).unwrap();
        let frame = Frame::from_vec(
            vec![100; 24],
            FrameMetadata {
                sequence: 0,
                width: 4,
                height: 4,
                format: PixelFormat::Nv21,
                device_timestamp: None,
            },
        );

        for round in 0..200 {
            let image = engine
                .transform(&frame, ProcessingMode::Raw, EdgeParameters::default())
                .unwrap();
            handoff.publish(image);
            // Consume every other frame so both the overwrite and the take
            // path hand boxes back.
            if round % 2 == 1 {
                assert!(reader.try_consume().is_some());
            }
        }
        assert!(handoff.slot_allocations() <= SPARE_SLOTS as u64);
        assert_eq!(engine.pool_misses(), 0);
    }

    #[test]
    fn reset_clears_slot_and_signals_reader() {
        let handoff = Arc::new(FrameHandoff::new());
        let mut reader = handoff.reader();
        handoff.publish(images(1).pop().unwrap());
        handoff.reset();

        assert!(reader.poll_reset());
        assert!(!reader.poll_reset());
        assert!(reader.try_consume().is_none());
    }

    #[test]
    fn concurrent_reader_sees_increasing_sequences() {
        let handoff = Arc::new(FrameHandoff::new());
        let producer = {
            let handoff = Arc::clone(&handoff);
            std::thread::spawn(move || {
                let mut engine = TransformEngine::new();
                engine.init(4, 4).unwrap();
                for sequence in 0..2_000u64 {
                    let frame = Frame::from_vec(
                        vec![(sequence % 200) as u8; 24],
                        FrameMetadata {
                            sequence,
                            width: 4,
                            height: 4,
                            format: PixelFormat::Nv21,
                            device_timestamp: None,
                        },
                    );
                    let image = engine
                        .transform(&frame, ProcessingMode::Raw, EdgeParameters::default())
                        .unwrap();
                    handoff.publish(image);
                }
            })
        };

        let mut reader = handoff.reader();
        let mut last = 0;
        while !producer.is_finished() {
            if let Some(image) = reader.try_consume() {
                assert!(image.frame_sequence() >= last);
                assert_eq!(image.len(), 64);
                last = image.frame_sequence();
            }
        }
        producer.join().unwrap();
    }
}
