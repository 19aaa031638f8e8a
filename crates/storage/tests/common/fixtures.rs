/// Reproducible payload of `len` bytes derived from `seed`.
#[allow(dead_code)]
pub fn seeded_bytes(seed: u64, len: usize) -> Vec<u8> {
    // xorshift64*; a zero state would stay zero forever.
    let mut state = seed | 1;
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        let word = state.wrapping_mul(0x2545_F491_4F6C_DD1D).to_le_bytes();
        let take = (len - data.len()).min(word.len());
        data.extend_from_slice(&word[..take]);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_payload() {
        assert_eq!(seeded_bytes(7, 1001), seeded_bytes(7, 1001));
        assert_eq!(seeded_bytes(7, 1001).len(), 1001);
    }

    #[test]
    fn seeds_diverge() {
        assert_ne!(seeded_bytes(7, 64), seeded_bytes(8, 64));
    }
}
