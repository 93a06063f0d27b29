//! Bit-field primitives for 16-bit words.
//!
//! Every instruction field in the X16 is pulled out of the raw word with
//! these helpers. Out-of-range bit indices or widths mean the caller's
//! decode logic is wrong, so they panic instead of masking silently.

/// Number of bits in a machine word.
pub const WORD_BITS: u32 = 16;

/// Get bit `n` (0 = LSB) as 0 or 1.
///
/// # Panics
/// Panics if `n` is not in `0..16`.
#[inline]
pub fn get_bit(word: u16, n: u32) -> u16 {
    assert!(n < WORD_BITS, "bit index {} out of range (0-15)", n);
    (word >> n) & 1
}

/// Extract `width` bits starting at bit `n`.
///
/// # Panics
/// Panics if `n` is not in `0..16` or `width` is not in `1..=16`.
#[inline]
pub fn get_bits(word: u16, n: u32, width: u32) -> u16 {
    assert!(n < WORD_BITS, "bit index {} out of range (0-15)", n);
    assert!(
        width >= 1 && width <= WORD_BITS,
        "field width {} out of range (1-16)",
        width
    );
    let mask = (1u32 << width) - 1;
    ((u32::from(word) >> n) & mask) as u16
}

/// Return `word` with bit `n` set.
///
/// # Panics
/// Panics if `n` is not in `0..16`.
#[inline]
pub fn set_bit(word: u16, n: u32) -> u16 {
    assert!(n < WORD_BITS, "bit index {} out of range (0-15)", n);
    word | (1 << n)
}

/// Return `word` with bit `n` cleared.
///
/// # Panics
/// Panics if `n` is not in `0..16`.
#[inline]
pub fn clear_bit(word: u16, n: u32) -> u16 {
    assert!(n < WORD_BITS, "bit index {} out of range (0-15)", n);
    word & !(1 << n)
}

/// Sign-extend the low `width` bits of `value` to a full word.
///
/// If bit `width - 1` is set every higher bit becomes 1, otherwise the
/// value is masked to exactly `width` bits.
///
/// # Panics
/// Panics if `width` is not in `1..=16`.
#[inline]
pub fn sign_extend(value: u16, width: u32) -> u16 {
    assert!(
        width >= 1 && width <= WORD_BITS,
        "field width {} out of range (1-16)",
        width
    );
    let value = u32::from(value);
    let extended = if value & (1 << (width - 1)) != 0 {
        value | (0xFFFF << width)
    } else {
        value & ((1 << width) - 1)
    };
    extended as u16
}

/// True when bit 15 is set.
#[inline]
pub fn is_negative(word: u16) -> bool {
    get_bit(word, 15) == 1
}

/// True when bit 15 is clear. Zero counts as positive here.
#[inline]
pub fn is_positive(word: u16) -> bool {
    get_bit(word, 15) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_get_bit() {
        assert_eq!(get_bit(0b1010, 0), 0);
        assert_eq!(get_bit(0b1010, 1), 1);
        assert_eq!(get_bit(0x8000, 15), 1);
    }

    #[test]
    fn test_get_bits_fields() {
        // ADD R3, R1, #-1 = 0001 011 001 1 11111
        let word = 0b0001_0110_0111_1111;
        assert_eq!(get_bits(word, 12, 4), 0x1);
        assert_eq!(get_bits(word, 9, 3), 3);
        assert_eq!(get_bits(word, 6, 3), 1);
        assert_eq!(get_bits(word, 5, 1), 1);
        assert_eq!(get_bits(word, 0, 5), 0b11111);
        assert_eq!(get_bits(0xBEEF, 0, 16), 0xBEEF);
    }

    #[test]
    fn test_set_and_clear_bit() {
        assert_eq!(set_bit(0, 15), 0x8000);
        assert_eq!(set_bit(0x0001, 0), 0x0001);
        assert_eq!(clear_bit(0xFFFF, 0), 0xFFFE);
        assert_eq!(clear_bit(0x0000, 7), 0x0000);
    }

    #[test]
    fn test_sign_extend_known_values() {
        assert_eq!(sign_extend(0b11111, 5), 0xFFFF);
        assert_eq!(sign_extend(0b01111, 5), 0x000F);
        assert_eq!(sign_extend(0b10000, 5), 0xFFF0);
        assert_eq!(sign_extend(0x1FF, 9), 0xFFFF);
        assert_eq!(sign_extend(0x0FF, 9), 0x00FF);
        assert_eq!(sign_extend(0x8000, 16), 0x8000);
        // Bits above the field are discarded for positive values.
        assert_eq!(sign_extend(0xFF0F, 5), 0x000F);
    }

    #[test]
    fn test_sign_predicates() {
        assert!(is_negative(0x8000));
        assert!(!is_positive(0xFFFF));
        assert!(is_positive(0x7FFF));
        assert!(is_positive(0));
    }

    #[test]
    #[should_panic(expected = "bit index")]
    fn test_get_bit_out_of_range() {
        get_bit(0, 16);
    }

    #[test]
    #[should_panic(expected = "field width")]
    fn test_get_bits_zero_width() {
        get_bits(0, 0, 0);
    }

    #[test]
    #[should_panic(expected = "field width")]
    fn test_sign_extend_too_wide() {
        sign_extend(0, 17);
    }

    #[test]
    #[should_panic(expected = "bit index")]
    fn test_set_bit_out_of_range() {
        set_bit(0, 16);
    }

    proptest! {
        #[test]
        fn prop_sign_extend_matches_twos_complement(width in 1u32..=16, raw in any::<u32>()) {
            let x = raw & ((1u32 << width) - 1);
            let expected = if x < (1 << (width - 1)) {
                x as i32
            } else {
                x as i32 - (1i32 << width)
            };
            prop_assert_eq!(sign_extend(x as u16, width) as i16 as i32, expected);
        }

        #[test]
        fn prop_get_bits_recovers_placed_field(
            n in 0u32..16,
            w in 1u32..=16,
            raw in any::<u16>(),
            noise in any::<u16>(),
        ) {
            prop_assume!(n + w <= 16);
            let mask = ((1u32 << w) - 1) as u16;
            let value = raw & mask;
            let word = (noise & !(mask << n)) | (value << n);
            prop_assert_eq!(get_bits(word, n, w), value);
        }

        #[test]
        fn prop_set_then_get(word in any::<u16>(), n in 0u32..16) {
            prop_assert_eq!(get_bit(set_bit(word, n), n), 1);
            prop_assert_eq!(get_bit(clear_bit(word, n), n), 0);
        }
    }
}
