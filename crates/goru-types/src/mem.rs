//! Linear-memory page limits for guest instances.

use serde::{Deserialize, Serialize};

const PAGE_SIZE_BYTES: u64 = 64 * 1024;

/// A WASM linear-memory page cap, in 64 KiB pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryPages(pub u32);

impl MemoryPages {
    /// 1 MiB preset.
    pub const MB_1: MemoryPages = MemoryPages(16);
    /// 16 MiB preset.
    pub const MB_16: MemoryPages = MemoryPages(256);
    /// 64 MiB preset.
    pub const MB_64: MemoryPages = MemoryPages(1024);
    /// 256 MiB preset — the default.
    pub const MB_256: MemoryPages = MemoryPages(4096);
    /// 1 GiB preset.
    pub const GB_1: MemoryPages = MemoryPages(16384);

    /// Total byte budget this page count represents.
    pub fn bytes(self) -> u64 {
        u64::from(self.0) * PAGE_SIZE_BYTES
    }
}

impl Default for MemoryPages {
    fn default() -> Self {
        MemoryPages::MB_256
    }
}

impl From<u32> for MemoryPages {
    fn from(pages: u32) -> Self {
        MemoryPages(pages)
    }
}

impl std::str::FromStr for MemoryPages {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1mb" => Ok(Self::MB_1),
            "16mb" => Ok(Self::MB_16),
            "64mb" => Ok(Self::MB_64),
            "256mb" => Ok(Self::MB_256),
            "1gb" => Ok(Self::GB_1),
            other => other
                .parse::<u32>()
                .map(MemoryPages)
                .map_err(|_| format!("unknown memory preset: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_page_counts() {
        assert_eq!(MemoryPages::MB_256.0, 4096);
        assert_eq!(MemoryPages::MB_256.bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn parses_named_presets() {
        assert_eq!("64mb".parse::<MemoryPages>().unwrap(), MemoryPages::MB_64);
        assert_eq!("512".parse::<MemoryPages>().unwrap(), MemoryPages(512));
    }
}
