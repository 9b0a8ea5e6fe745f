use std::env;

/// Heap size used by [`Config::default`], in bytes.
pub const DEFAULT_HEAP_SIZE: usize = 100_000;

/// Smallest heap growth, in header units. Growing one unit at a time would
/// mean one break move per allocation.
pub const MIN_GROWTH_UNITS: usize = 1024;

pub const HEAP_SIZE_VAR: &str = "FIXHEAP_HEAP_SIZE";
pub const MIN_GROWTH_UNITS_VAR: &str = "FIXHEAP_MIN_GROWTH_UNITS";

/// Placement strategy for new blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
  /// Search the free list starting where the previous request was satisfied
  /// and take the first block that fits.
  #[default]
  NextFit,
}

/// Everything [`crate::Allocator::init_with`] needs.
///
/// Growth is all or nothing: the break moves by at least `min_growth_units`
/// units ([`crate::UNIT`] bytes each) or not at all. A heap smaller than one
/// growth step (16 KiB with the defaults) cannot serve a single allocation,
/// so lower `min_growth_units` along with `heap_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  pub method: Method,
  pub heap_size: usize,
  pub min_growth_units: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      method: Method::default(),
      heap_size: DEFAULT_HEAP_SIZE,
      min_growth_units: MIN_GROWTH_UNITS,
    }
  }
}

impl Config {
  pub fn new(
    method: Method,
    heap_size: usize,
  ) -> Self {
    Self {
      method,
      heap_size,
      ..Self::default()
    }
  }

  pub fn with_min_growth_units(
    mut self,
    units: usize,
  ) -> Self {
    self.min_growth_units = units.max(1);
    self
  }

  /// Defaults, overridden by `FIXHEAP_HEAP_SIZE` and
  /// `FIXHEAP_MIN_GROWTH_UNITS` when they hold valid numbers.
  pub fn from_env() -> Self {
    Self::from_vars(|name| env::var(name).ok())
  }

  fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let mut config = Self::default();

    if let Some(size) = read_var(&lookup, HEAP_SIZE_VAR) {
      config.heap_size = size;
    }

    if let Some(units) = read_var(&lookup, MIN_GROWTH_UNITS_VAR) {
      config = config.with_min_growth_units(units);
    }

    config
  }
}

fn read_var(
  lookup: impl Fn(&str) -> Option<String>,
  name: &str,
) -> Option<usize> {
  let value = lookup(name)?;

  match value.trim().parse() {
    Ok(parsed) => Some(parsed),
    Err(err) => {
      log::warn!("ignoring {name}={value:?}: {err}");
      None
    }
  }
}
