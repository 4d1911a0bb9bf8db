//! Byte-group reversal for images dumped with swapped endianness.

/// Reverses every complete `width`-byte group of `data` in place.
///
/// Trailing bytes that do not fill a whole group are left untouched.
pub fn swap_groups(data: &mut [u8], width: usize) {
    if width < 2 {
        return;
    }

    for group in data.chunks_exact_mut(width) {
        group.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_pairs() {
        let mut data = *b"abcdef";
        swap_groups(&mut data, 2);
        assert_eq!(&data, b"badcfe");
    }

    #[test]
    fn test_trailing_bytes_untouched() {
        let mut data = *b"abcdefg";
        swap_groups(&mut data, 4);
        assert_eq!(&data, b"dcbaefg");
    }

    #[test]
    fn test_width_one_is_noop() {
        let mut data = *b"abc";
        swap_groups(&mut data, 1);
        assert_eq!(&data, b"abc");
    }
}
