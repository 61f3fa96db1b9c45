// src/exec/completion.rs

//! Single-resolution completion signal.
//!
//! A process channel has two ways to finish: the child exits, or the
//! producer sends its end-of-stream report. Both race into one
//! [`CompletionLatch`]; the first writer wins and later writes are ignored.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The child exited with this code (`-1` when killed by a signal).
    Exited(i32),
    /// The end-of-stream report arrived first.
    EndOfStream,
}

#[derive(Debug, Default)]
pub struct CompletionLatch {
    slot: OnceLock<Completion>,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `completion` unless the latch is already resolved.
    ///
    /// Returns `true` when this call won.
    pub fn resolve(&self, completion: Completion) -> bool {
        self.slot.set(completion).is_ok()
    }

    pub fn get(&self) -> Option<Completion> {
        self.slot.get().copied()
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let latch = CompletionLatch::new();
        assert!(!latch.is_resolved());

        assert!(latch.resolve(Completion::EndOfStream));
        assert!(!latch.resolve(Completion::Exited(3)));
        assert_eq!(latch.get(), Some(Completion::EndOfStream));
    }

    #[test]
    fn concurrent_writers_resolve_once() {
        let latch = std::sync::Arc::new(CompletionLatch::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let latch = latch.clone();
                std::thread::spawn(move || latch.resolve(Completion::Exited(i)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(latch.is_resolved());
    }
}
