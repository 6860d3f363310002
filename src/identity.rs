//! Randomized client identities (User-Agent strings)

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};

pub const BROWSERS: [&str; 8] = [
    "Firefox",
    "Safari",
    "Opera",
    "Flock",
    "Internet Explorer",
    "Seamonkey",
    "Konqueror",
    "GoogleBot",
];

pub const OPERATING_SYSTEMS: [&str; 12] = [
    "Windows 3.1",
    "Windows 95",
    "Windows 98",
    "Windows 2000",
    "Windows NT",
    "Windows XP",
    "Windows Vista",
    "Redhat Linux",
    "Ubuntu",
    "Fedora",
    "AmigaOS",
    "OS 10.5",
];

/// Builds `"<Browser>/<major>.<minor> (<OS> <major>.<minor>; en-US;)"` strings
/// from an injected random source.
pub struct IdentityGenerator {
    rng: Box<dyn RngCore + Send>,
}

impl IdentityGenerator {
    /// Generator backed by an entropy-seeded `StdRng`
    pub fn new() -> Self {
        Self::with_rng(Box::new(StdRng::from_entropy()))
    }

    /// Deterministic generator, same seed gives the same sequence
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(Box::new(StdRng::seed_from_u64(seed)))
    }

    pub fn with_rng(rng: Box<dyn RngCore + Send>) -> Self {
        Self { rng }
    }

    pub fn generate(&mut self) -> String {
        let rng = &mut self.rng;

        let browser = BROWSERS.choose(rng).copied().unwrap_or(BROWSERS[0]);
        let browser_major: u8 = rng.gen_range(1..=8);
        let browser_minor: u8 = rng.gen_range(0..=9);

        let os = OPERATING_SYSTEMS
            .choose(rng)
            .copied()
            .unwrap_or(OPERATING_SYSTEMS[0]);
        let os_major: u8 = rng.gen_range(1..=7);
        let os_minor: u8 = rng.gen_range(0..=9);

        format!(
            "{}/{}.{} ({} {}.{}; en-US;)",
            browser, browser_major, browser_minor, os, os_major, os_minor
        )
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdentityGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityGenerator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    /// Splits an identity back into (browser, version, os, version).
    fn parse_identity(identity: &str) -> Option<(&str, &str, &str, &str)> {
        let inner = identity.strip_suffix("; en-US;)")?;
        let (product, platform) = inner.split_once(" (")?;
        let (browser, browser_version) = product.split_once('/')?;
        let (os, os_version) = platform.rsplit_once(' ')?;
        Some((browser, browser_version, os, os_version))
    }

    fn assert_version(version: &str, max_major: u32) {
        let (major, minor) = version.split_once('.').expect("version has a dot");
        let major: u32 = major.parse().unwrap();
        let minor: u32 = minor.parse().unwrap();
        assert!((1..=max_major).contains(&major), "major {} out of range", major);
        assert!(minor <= 9, "minor {} out of range", minor);
    }

    #[test]
    fn test_generate_matches_grammar() {
        let mut generator = IdentityGenerator::new();

        for _ in 0..500 {
            let identity = generator.generate();
            let (browser, browser_version, os, os_version) =
                parse_identity(&identity).expect("identity matches the grammar");

            assert!(BROWSERS.contains(&browser), "unknown browser {}", browser);
            assert!(OPERATING_SYSTEMS.contains(&os), "unknown os {}", os);
            assert_version(browser_version, 8);
            assert_version(os_version, 7);
        }
    }

    #[test]
    fn test_seeded_generators_are_reproducible() {
        let mut a = IdentityGenerator::seeded(42);
        let mut b = IdentityGenerator::seeded(42);

        for _ in 0..20 {
            assert_eq!(a.generate(), b.generate());
        }
    }

    #[test]
    fn test_injected_rng_gives_exact_output() {
        // A constant zero source always picks the first entries and lowest versions.
        let mut generator = IdentityGenerator::with_rng(Box::new(StepRng::new(0, 0)));

        assert_eq!(generator.generate(), "Firefox/1.0 (Windows 3.1 1.0; en-US;)");
        assert_eq!(generator.generate(), "Firefox/1.0 (Windows 3.1 1.0; en-US;)");
    }

    #[test]
    fn test_generate_covers_vocabulary() {
        let mut generator = IdentityGenerator::seeded(7);
        let mut seen_browsers = std::collections::HashSet::new();

        for _ in 0..1000 {
            let identity = generator.generate();
            let (browser, _, _, _) = parse_identity(&identity).unwrap();
            seen_browsers.insert(browser.to_string());
        }

        assert_eq!(seen_browsers.len(), BROWSERS.len());
    }
}
