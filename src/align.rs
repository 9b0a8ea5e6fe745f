use crate::block::UNIT;

/// Rounds `value` up to the next multiple of `to`, which must be a power of
/// two.
///
/// # Examples
///
/// ```rust
/// use fixheap::align;
///
/// assert_eq!(align!(13, 8), 16);
/// assert_eq!(align!(16, 16), 16);
/// assert_eq!(align!(17, 16), 32);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr, $to:expr) => {
    ($value + $to - 1) & !($to - 1)
  };
}

/// Number of header units a block needs to serve `nbytes` bytes, header
/// included:
///
/// ```text
///   units = ceil((nbytes + UNIT) / UNIT) + 1
/// ```
///
/// The extra unit keeps every block strictly larger than the request after
/// header overhead. Returns `None` when the arithmetic overflows.
pub(crate) fn units_for(nbytes: usize) -> Option<usize> {
  let total = nbytes.checked_add(UNIT)?.checked_add(UNIT - 1)?;
  (total / UNIT).checked_add(1)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (UNIT * i + 1)..=(UNIT * (i + 1));

      let expected_alignment = UNIT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size, UNIT));
      }
    }
  }

  #[test]
  fn test_units_for() {
    // A zero byte request still gets its header plus the spare unit.
    assert_eq!(units_for(0), Some(2));
    assert_eq!(units_for(1), Some(3));
    assert_eq!(units_for(UNIT), Some(3));
    assert_eq!(units_for(UNIT + 1), Some(4));
    assert_eq!(units_for(10 * UNIT), Some(12));

    for nbytes in 0..512 {
      let units = units_for(nbytes).unwrap();
      assert!((units - 1) * UNIT >= nbytes);
    }
  }

  #[test]
  fn test_units_for_overflow() {
    assert_eq!(units_for(usize::MAX), None);
    assert_eq!(units_for(usize::MAX - UNIT + 1), None);
  }
}
