//! Bit-level packing
//!
//! Index pages store tuples back to back at arbitrary bit offsets, so a
//! tuple of 72 or 136 bits wastes no padding. Bits are numbered LSB-first
//! inside each byte: bit `n` of a buffer lives in byte `n / 8` at position
//! `n % 8`. Multi-bit values are written least significant bit first.

/// Number of bits needed to hold any value in `0..n`
pub fn log2_ceil(n: u64) -> usize {
    if n <= 1 {
        0
    } else {
        (64 - (n - 1).leading_zeros()) as usize
    }
}

/// Write the low `bits` bits of `value` at bit offset `pos`
pub fn write_bits(buf: &mut [u8], mut pos: usize, value: u64, bits: usize) {
    debug_assert!(bits <= 64);
    let mut value = if bits == 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    };
    let mut remaining = bits;

    while remaining > 0 {
        let byte = pos / 8;
        let offset = pos % 8;
        let take = (8 - offset).min(remaining);
        let mask = (((1u16 << take) - 1) as u8) << offset;

        buf[byte] = (buf[byte] & !mask) | (((value as u8) << offset) & mask);

        value >>= take;
        remaining -= take;
        pos += take;
    }
}

/// Read `bits` bits starting at bit offset `pos`
pub fn read_bits(buf: &[u8], mut pos: usize, bits: usize) -> u64 {
    debug_assert!(bits <= 64);
    let mut result = 0u64;
    let mut shift = 0;
    let mut remaining = bits;

    while remaining > 0 {
        let byte = pos / 8;
        let offset = pos % 8;
        let take = (8 - offset).min(remaining);
        let chunk = ((buf[byte] >> offset) as u64) & ((1u64 << take) - 1);

        result |= chunk << shift;
        shift += take;
        remaining -= take;
        pos += take;
    }

    result
}

/// Sequential writer over a bit buffer
pub struct BitWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> BitWriter<'a> {
    pub fn new(buf: &'a mut [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn write(&mut self, value: u64, bits: usize) {
        write_bits(self.buf, self.pos, value, bits);
        self.pos += bits;
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write(value as u64, 1);
    }

    /// Current bit offset
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Sequential reader over a bit buffer
pub struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub fn read(&mut self, bits: usize) -> u64 {
        let value = read_bits(self.buf, self.pos, bits);
        self.pos += bits;
        value
    }

    pub fn read_bool(&mut self) -> bool {
        self.read(1) != 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}
