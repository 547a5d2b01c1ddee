/// Native 24-bit machine word, stored in the low bits of a `u32`.
pub type Word = u32;

/// Largest value a word can hold.
pub const WORD_MAX: Word = 0xFF_FFFF;

const WORD_BITS: u32 = 24;
const SIGN_BIT: Word = 1 << (WORD_BITS - 1);

#[inline]
pub fn is_word(value: u32) -> bool {
    value <= WORD_MAX
}

/// Reduce any integer result to a word, modulo 2^24.
#[inline]
pub fn wrap(value: i64) -> Word {
    (value & WORD_MAX as i64) as Word
}

/// Interpret a word as a 24-bit two's complement integer.
#[inline]
pub fn to_signed(word: Word) -> i32 {
    let word = word & WORD_MAX;
    if word & SIGN_BIT != 0 {
        word as i32 - (1 << WORD_BITS)
    } else {
        word as i32
    }
}

/// Sign-extend the low `bits` bits of `value`.
#[inline]
pub fn s_ext(value: u32, bits: u32) -> i32 {
    debug_assert!(bits > 0 && bits < 32);
    let magnitude = value & ((1u32 << bits) - 1);
    if magnitude & (1u32 << (bits - 1)) != 0 {
        magnitude as i32 - (1i32 << bits)
    } else {
        magnitude as i32
    }
}

/// Circular left shift within 24 bits.
#[inline]
pub fn rotate_left(word: Word, count: u32) -> Word {
    let count = count % WORD_BITS;
    let word = word & WORD_MAX;
    if count == 0 {
        return word;
    }
    ((word << count) | (word >> (WORD_BITS - count))) & WORD_MAX
}

/// Arithmetic right shift within 24 bits; vacated bits take the sign.
#[inline]
pub fn shift_right(word: Word, count: u32) -> Word {
    let count = count.min(WORD_BITS - 1);
    wrap((to_signed(word) >> count) as i64)
}
