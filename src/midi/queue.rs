use crossbeam::queue::ArrayQueue;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::events::MidiEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiSignal {
    Event(MidiEvent),
    /// `dropped` oldest events were discarded since the last signal
    Overrun { dropped: u64 },
}

struct Shared {
    events: ArrayQueue<MidiEvent>,
    dropped: AtomicU64,
}

/// Producer half, cloned into every MIDI source. Pushing never blocks and
/// never allocates; when the queue is full the oldest event is discarded.
#[derive(Clone)]
pub struct MidiSender {
    shared: Arc<Shared>,
}

/// Single consumer half.
pub struct MidiReceiver {
    shared: Arc<Shared>,
}

pub fn midi_queue(capacity: usize) -> (MidiSender, MidiReceiver) {
    let shared = Arc::new(Shared {
        events: ArrayQueue::new(capacity.max(1)),
        dropped: AtomicU64::new(0),
    });
    (
        MidiSender {
            shared: shared.clone(),
        },
        MidiReceiver { shared },
    )
}

impl MidiSender {
    pub fn push(&self, event: MidiEvent) {
        if self.shared.events.force_push(event).is_some() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl MidiReceiver {
    /// Pending overruns are reported before the next buffered event.
    pub fn try_recv(&self) -> Option<MidiSignal> {
        let dropped = self.shared.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            return Some(MidiSignal::Overrun { dropped });
        }
        self.shared.events.pop().map(MidiSignal::Event)
    }

    pub fn drain(&self) -> impl Iterator<Item = MidiSignal> + '_ {
        std::iter::from_fn(move || self.try_recv())
    }

    pub fn capacity(&self) -> usize {
        self.shared.events.capacity()
    }

    pub fn len(&self) -> usize {
        self.shared.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MidiMessage;
    use std::time::Instant;

    fn event(note: u8) -> MidiEvent {
        MidiEvent::note_on(Instant::now(), 0, note, 100)
    }

    fn note_of(signal: &MidiSignal) -> Option<u8> {
        match signal {
            MidiSignal::Event(MidiEvent {
                message: MidiMessage::NoteOn { note, .. },
                ..
            }) => Some(*note),
            _ => None,
        }
    }

    #[test]
    fn delivers_in_arrival_order() {
        let (tx, rx) = midi_queue(8);
        for note in 60..65 {
            tx.push(event(note));
        }
        let notes: Vec<u8> = rx.drain().filter_map(|s| note_of(&s)).collect();
        assert_eq!(notes, vec![60, 61, 62, 63, 64]);
        assert!(rx.is_empty());
    }

    #[test]
    fn overflow_drops_oldest_and_signals_overrun() {
        let (tx, rx) = midi_queue(256);
        let produced = 1000u64;
        for i in 0..produced {
            tx.push(event((i % 128) as u8));
        }
        assert_eq!(rx.len(), 256);

        let signals: Vec<MidiSignal> = rx.drain().collect();
        assert_eq!(
            signals[0],
            MidiSignal::Overrun {
                dropped: produced - 256
            }
        );

        let delivered: Vec<u8> = signals[1..].iter().filter_map(note_of).collect();
        assert_eq!(delivered.len() as u64, produced.min(256));
        // the newest 256 survive
        assert_eq!(delivered[0], (744 % 128) as u8);
        assert_eq!(*delivered.last().unwrap(), (999 % 128) as u8);
    }

    #[test]
    fn overrun_is_reported_once() {
        let (tx, rx) = midi_queue(2);
        for note in 0..5 {
            tx.push(event(note));
        }
        assert_eq!(rx.try_recv(), Some(MidiSignal::Overrun { dropped: 3 }));
        assert!(matches!(rx.try_recv(), Some(MidiSignal::Event(_))));
        assert!(matches!(rx.try_recv(), Some(MidiSignal::Event(_))));
        assert_eq!(rx.try_recv(), None);
    }
}
