use rand::Rng;

/// A byte buffer that can be fed to a target.
///
/// Mutators work on a clone of the accepted input, so the accepted buffer only
/// changes when the engine commits a candidate.
pub trait Input: Clone + std::fmt::Debug + 'static {
    fn as_bytes(&self) -> &[u8];
    fn as_mut_bytes(&mut self) -> &mut [u8];
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;
}

impl Input for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self.as_slice()
    }
    fn as_mut_bytes(&mut self) -> &mut [u8] {
        self.as_mut_slice()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
}

/// Fresh input of `len` bytes drawn from `rng`.
pub fn random_input<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rng.fill_bytes(&mut data);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn vec_u8_impl_input() {
        let mut data: Vec<u8> = vec![1, 2, 3];
        let empty_data: Vec<u8> = vec![];
        assert_eq!(data.as_bytes(), &[1, 2, 3]);
        data.as_mut_bytes()[1] = 9;
        assert_eq!(data.as_bytes(), &[1, 9, 3]);
        assert_eq!(Input::len(&data), 3);
        assert!(!Input::is_empty(&data));
        assert!(Input::is_empty(&empty_data));
    }

    #[test]
    fn random_input_has_requested_length_and_follows_the_seed() {
        let mut rng_a = ChaCha8Rng::from_seed([3; 32]);
        let mut rng_b = ChaCha8Rng::from_seed([3; 32]);
        let a = random_input(57, &mut rng_a);
        let b = random_input(57, &mut rng_b);
        assert_eq!(a.len(), 57);
        assert_eq!(a, b);
        assert!(random_input(0, &mut rng_a).is_empty());
    }
}
