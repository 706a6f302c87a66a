//! Vehicle catalog and fuzzy matcher.
//!
//! The catalog is a static, ordered table of DropTruck vehicle options. Order is
//! significant: when two entries score equally the earlier one wins, so longer
//! names that contain a shorter one ("Bada Dost" vs "Dost") are declared first.

use crate::normalize::normalize_for_match;
use once_cell::sync::Lazy;
use tracing::debug;

/// Default acceptance threshold on the 0–100 similarity scale.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 85.0;

/// One catalog row: a canonical name plus spoken variants.
#[derive(Debug, Clone)]
pub struct VehicleCatalogEntry {
    pub canonical_name: String,
    pub aliases: Vec<String>,
    /// Normalized canonical name followed by normalized aliases, deduplicated.
    keys: Vec<String>,
}

impl VehicleCatalogEntry {
    pub fn new(canonical_name: &str, aliases: &[&str]) -> Self {
        let mut keys: Vec<String> = Vec::with_capacity(aliases.len() + 1);
        for raw in std::iter::once(canonical_name).chain(aliases.iter().copied()) {
            let key = normalize_for_match(raw);
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        Self {
            canonical_name: canonical_name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            keys,
        }
    }

    /// Normalized forms this entry answers to.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleMatch {
    pub canonical_name: String,
    /// Similarity in [0, 100].
    pub confidence: f64,
}

/// Ordered vehicle table.
#[derive(Debug, Clone)]
pub struct VehicleCatalog {
    entries: Vec<VehicleCatalogEntry>,
}

static DEFAULT_CATALOG: Lazy<VehicleCatalog> = Lazy::new(VehicleCatalog::droptruck);

impl VehicleCatalog {
    pub fn new(entries: Vec<VehicleCatalogEntry>) -> Self {
        Self { entries }
    }

    /// Process-wide DropTruck catalog, built once.
    pub fn shared() -> &'static VehicleCatalog {
        &DEFAULT_CATALOG
    }

    pub fn entries(&self) -> &[VehicleCatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn droptruck() -> Self {
        let e = VehicleCatalogEntry::new;
        Self::new(vec![
            e("Tata Ace", &["chota hathi", "chhota hathi", "tata ace gold", "ace"]),
            e("Tata Intra", &["intra", "tata intra v30"]),
            e("Mahindra Jeeto", &["jeeto"]),
            e("Mahindra Supro", &["supro"]),
            e("Bada Dost", &["bada dost", "ashok leyland bada dost", "big dost"]),
            e("Dost", &["ashok leyland dost", "dost plus"]),
            e("Bolero", &["bolero pickup", "bolero pik up", "mahindra bolero", "bolero maxx"]),
            e("Tata Yodha", &["yodha"]),
            e("407", &["tata 407", "four zero seven", "four not seven", "four o seven"]),
            e("Tata 709", &["709", "seven zero nine"]),
            e("Eicher Pro", &["eicher", "eicher truck"]),
            e("32 Feet Multi-Axle", &["32 ft multi axle", "thirty two feet", "32 feet", "32 ft", "multi axle"]),
            e("32 Feet Single-Axle", &["32 ft single axle", "single axle"]),
            e("20 Feet Trailer", &["20 ft trailer", "twenty feet trailer"]),
            e("24 Feet Trailer", &["24 ft trailer", "twenty four feet trailer"]),
            e("40 Feet Low-Bed Trailer", &["40 ft low bed", "low bed trailer", "lowbed", "low bed"]),
            e("40 Feet Semi-Bed Trailer", &["40 ft semi bed", "semi bed trailer", "semi bed"]),
            e("40 Feet High-Bed Trailer", &["40 ft high bed", "high bed trailer", "high bed", "flatbed trailer"]),
            e("12 Feet", &["12 ft", "twelve feet", "12 foot", "twelve foot"]),
            e("14 Feet", &["14 ft", "fourteen feet", "14 foot", "fourteen foot"]),
            e("17 Feet", &["17 ft", "seventeen feet", "17 foot", "seventeen foot"]),
            e("19 Feet", &["19 ft", "nineteen feet", "19 foot", "nineteen foot"]),
            e("20 Feet", &["20 ft", "twenty feet", "20 foot", "twenty foot"]),
            e("22 Feet", &["22 ft", "twenty two feet", "22 foot", "twenty two foot"]),
            e("24 Feet", &["24 ft", "twenty four feet", "24 foot", "twenty four foot"]),
            e("6 Wheel", &["6 wheeler", "six wheel", "six wheeler", "6 tyre"]),
            e("10 Wheel", &["10 wheeler", "ten wheel", "ten wheeler", "10 tyre"]),
            e("12 Wheel", &["12 wheeler", "twelve wheel", "twelve wheeler", "12 tyre"]),
            e("14 Wheel", &["14 wheeler", "fourteen wheel", "fourteen wheeler", "14 tyre"]),
            e("16 Wheel", &["16 wheeler", "sixteen wheel", "sixteen wheeler", "16 tyre"]),
            e("Car Carrier", &["car carrier truck", "car transporter"]),
            e("Part Load", &["part load", "ptl", "shared load"]),
        ])
    }
}

/// Fuzzy lookup over a catalog with a fixed acceptance threshold.
#[derive(Debug, Clone)]
pub struct VehicleMatcher {
    catalog: &'static VehicleCatalog,
    threshold: f64,
}

impl Default for VehicleMatcher {
    fn default() -> Self {
        Self::new(VehicleCatalog::shared(), DEFAULT_MATCH_THRESHOLD)
    }
}

impl VehicleMatcher {
    pub fn new(catalog: &'static VehicleCatalog, threshold: f64) -> Self {
        Self {
            catalog,
            threshold: threshold.clamp(0.0, 100.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score `candidate` against every name and alias; accept the best at or above threshold.
    pub fn match_candidate(&self, candidate: &str) -> Option<VehicleMatch> {
        let normalized = normalize_for_match(candidate);
        if normalized.is_empty() {
            return None;
        }
        self.best_by(|key| similarity(&normalized, key))
    }

    /// Exact word-aligned occurrence of any name or alias inside `text`.
    /// The first entry in catalog order with a hit wins.
    pub fn find_in_text(&self, text: &str) -> Option<VehicleMatch> {
        let padded = format!(" {} ", normalize_for_match(text));
        for entry in self.catalog.entries() {
            if entry
                .keys()
                .iter()
                .any(|key| padded.contains(&format!(" {} ", key)))
            {
                return Some(VehicleMatch {
                    canonical_name: entry.canonical_name.clone(),
                    confidence: 100.0,
                });
            }
        }
        None
    }

    /// Fuzzy-match the leading words of `phrase`, taking as many words as each key has.
    /// Used after an anchor such as "truck type" or "need a".
    pub fn match_leading(&self, phrase: &str) -> Option<VehicleMatch> {
        let normalized = normalize_for_match(phrase);
        let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
        if words.is_empty() {
            return None;
        }
        self.best_by(|key| {
            let n = key.split(' ').count().min(words.len());
            similarity(&words[..n].join(" "), key)
        })
    }

    fn best_by<F>(&self, score: F) -> Option<VehicleMatch>
    where
        F: Fn(&str) -> f64,
    {
        let mut best: Option<(&VehicleCatalogEntry, f64)> = None;
        for entry in self.catalog.entries() {
            for key in entry.keys() {
                let s = score(key);
                // Strictly greater: earlier entries keep ties.
                if best.map_or(true, |(_, top)| s > top) {
                    best = Some((entry, s));
                }
            }
        }
        let (entry, top) = best?;
        if top >= self.threshold {
            debug!("vehicle match: {} ({:.1})", entry.canonical_name, top);
            Some(VehicleMatch {
                canonical_name: entry.canonical_name.clone(),
                confidence: top,
            })
        } else {
            debug!("no vehicle match (best {} at {:.1})", entry.canonical_name, top);
            None
        }
    }
}

/// Normalized indel similarity on characters, scaled to [0, 100].
///
/// `200 * LCS(a, b) / (len(a) + len(b))`; identical strings score 100.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in &a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[b.len()];
    200.0 * lcs as f64 / total as f64
}
