//! Bit-level similarity between fingerprints.
//!
//! Each hex digit expands to 4 bits; similarity is the share of equal bits.
//! Keyed hashes do not preserve input similarity, so this is a best-effort
//! near-duplicate signal only.

/// `1 - differing_bits / total_bits` over the hex expansion of `a` and `b`.
///
/// Strings of different length (or empty strings) are not comparable and
/// score 0.0. Non-hex characters count as entirely different digits.
pub fn hamming_similarity(a: &str, b: &str) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let total_bits = a.len() * 4;
    let differing: u32 = a
        .bytes()
        .zip(b.bytes())
        .map(|(x, y)| match (nibble(x), nibble(y)) {
            (Some(x), Some(y)) => (x ^ y).count_ones(),
            _ => 4,
        })
        .sum();

    1.0 - f64::from(differing) / total_bits as f64
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings() {
        assert_eq!(hamming_similarity("deadbeef", "deadbeef"), 1.0);
    }

    #[test]
    fn test_single_bit_difference() {
        // 0 vs 1 differs in one of 32 bits
        assert_eq!(hamming_similarity("00000000", "00000001"), 1.0 - 1.0 / 32.0);
    }

    #[test]
    fn test_complement() {
        assert_eq!(hamming_similarity("0000", "ffff"), 0.0);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(hamming_similarity("ABCD", "abcd"), 1.0);
    }

    #[test]
    fn test_length_mismatch_is_zero() {
        assert_eq!(hamming_similarity("abcd", "abcdef"), 0.0);
        assert_eq!(hamming_similarity("", ""), 0.0);
    }
}
