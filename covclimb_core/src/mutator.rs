use crate::input::Input;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutatorError {
    #[error("Cannot mutate position {position} of a {len}-byte input")]
    PositionOutOfBounds { position: usize, len: usize },
}

/// A `Mutator` derives a candidate `Input` from the currently accepted one.
///
/// The accepted input is only borrowed: the candidate is always a fresh copy,
/// so a rejected candidate leaves nothing behind.
///
/// # Type Parameters
/// * `I`: The type of `Input` this mutator operates on.
/// * `R`: The type of random number generator used for mutation decisions.
pub trait Mutator<I: Input, R: Rng + ?Sized> {
    /// Produces a candidate that differs from `input` at most at `position`.
    fn mutate(&mut self, input: &I, position: usize, rng: &mut R) -> Result<I, MutatorError>;
}

/// Replaces the byte at the requested position with a uniformly random value
/// from the full `0..=255` range.
///
/// The draw may repeat the current value; such a candidate simply fails to
/// produce new coverage.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaceByteMutator;

impl<I, R> Mutator<I, R> for ReplaceByteMutator
where
    I: Input,
    R: Rng + ?Sized,
{
    fn mutate(&mut self, input: &I, position: usize, rng: &mut R) -> Result<I, MutatorError> {
        if position >= input.len() {
            return Err(MutatorError::PositionOutOfBounds {
                position,
                len: input.len(),
            });
        }
        let mut candidate = input.clone();
        candidate.as_mut_bytes()[position] = rng.random::<u8>();
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn replace_byte_only_touches_the_requested_position() {
        let mut mutator = ReplaceByteMutator;
        let mut rng = ChaCha8Rng::from_seed([0; 32]);
        let original: Vec<u8> = vec![0xAA; 8];

        for position in 0..original.len() {
            for _ in 0..20 {
                let candidate = mutator.mutate(&original, position, &mut rng).unwrap();
                assert_eq!(candidate.len(), original.len());
                for (i, (&c, &o)) in candidate.iter().zip(original.iter()).enumerate() {
                    if i != position {
                        assert_eq!(c, o, "byte {i} changed while mutating {position}");
                    }
                }
            }
        }
        assert_eq!(original, vec![0xAA; 8], "accepted buffer must stay untouched");
    }

    #[test]
    fn replace_byte_covers_the_full_byte_range() {
        let mut mutator = ReplaceByteMutator;
        let mut rng = ChaCha8Rng::from_seed([5; 32]);
        let original: Vec<u8> = vec![0];
        let mut seen = HashSet::new();
        for _ in 0..20_000 {
            seen.insert(mutator.mutate(&original, 0, &mut rng).unwrap()[0]);
        }
        assert_eq!(seen.len(), 256);
    }

    #[test]
    fn replace_byte_rejects_out_of_bounds_position() {
        let mut mutator = ReplaceByteMutator;
        let mut rng = ChaCha8Rng::from_seed([1; 32]);
        let input: Vec<u8> = vec![1, 2, 3];
        assert_eq!(
            mutator.mutate(&input, 3, &mut rng),
            Err(MutatorError::PositionOutOfBounds { position: 3, len: 3 })
        );
        let empty: Vec<u8> = Vec::new();
        assert!(mutator.mutate(&empty, 0, &mut rng).is_err());
    }
}
