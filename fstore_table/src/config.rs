use fstore_core::Parallelism;

/// Settings shared by every read and write of an [`FstStore`](crate::FstStore).
///
/// ```
/// use fstore_table::StoreConfig;
///
/// let config = StoreConfig::default().threads(2);
/// assert_eq!(config.parallelism().threads(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreConfig {
    parallelism: Parallelism,
}

impl StoreConfig {
    /// Worker threads per column read or write. `0` is treated as `1`.
    pub fn threads(mut self, threads: usize) -> Self {
        self.parallelism = Parallelism::new(threads);
        self
    }

    pub fn sequential() -> Self {
        Self {
            parallelism: Parallelism::sequential(),
        }
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }
}
