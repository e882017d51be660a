//! Human-readable transfer sizes.

/// Bytes per KiB.
pub const KB: usize = 1024;
/// Bytes per MiB.
pub const MB: usize = KB * KB;

/// Format `bytes` as KiB: one decimal below 10 KiB, none above.
#[allow(clippy::cast_precision_loss)]
pub fn format_kb(bytes: usize) -> String {
    let kb = bytes as f64 / KB as f64;
    if bytes < 10 * KB {
        format!("{kb:.1}")
    } else {
        format!("{kb:.0}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_sizes_keep_one_decimal() {
        assert_eq!(format_kb(0), "0.0");
        assert_eq!(format_kb(1536), "1.5");
        assert_eq!(format_kb(10 * KB - 1), "10.0");
    }

    #[test]
    fn test_large_sizes_are_whole() {
        assert_eq!(format_kb(10 * KB), "10");
        assert_eq!(format_kb(123 * KB + 100), "123");
        assert_eq!(format_kb(MB), "1024");
    }
}
