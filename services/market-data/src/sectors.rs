//! Sector catalog
//!
//! Static mapping of theme sectors to their member instruments plus a
//! code → display name table used when a lookup returns no name. The
//! built-in catalog covers eight KRX theme sectors; a JSON file with the
//! same shape can replace it at startup.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use types::ids::{InstrumentCode, SectorCode};

use crate::config::ConfigError;

/// One configured sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorDefinition {
    pub code: SectorCode,
    pub name: String,
    /// Display color, e.g. `#4F46E5`.
    pub color: String,
    pub instrument_codes: Vec<InstrumentCode>,
}

/// Read-only source of sector configuration.
///
/// Assumed to change only between restarts.
pub trait SectorConfigProvider: Send + Sync {
    /// Sectors in configuration order.
    fn list_sectors(&self) -> &[SectorDefinition];

    fn sector(&self, code: &str) -> Option<&SectorDefinition> {
        self.list_sectors().iter().find(|s| s.code.as_str() == code)
    }

    /// Display name for an instrument, if the catalog knows it.
    fn instrument_name(&self, instrument: &InstrumentCode) -> Option<&str>;

    /// Distinct instruments across all sectors.
    fn distinct_instruments(&self) -> BTreeSet<InstrumentCode> {
        self.list_sectors()
            .iter()
            .flat_map(|s| s.instrument_codes.iter().cloned())
            .collect()
    }
}

/// On-disk catalog shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectorCatalog {
    pub sectors: Vec<SectorDefinition>,
    #[serde(default)]
    pub instrument_names: HashMap<InstrumentCode, String>,
}

/// In-memory catalog.
#[derive(Debug, Clone)]
pub struct StaticSectorConfig {
    sectors: Vec<SectorDefinition>,
    names: HashMap<InstrumentCode, String>,
}

impl StaticSectorConfig {
    /// Build from a catalog, rejecting duplicate sector codes and dropping
    /// repeated instruments within a sector.
    pub fn new(catalog: SectorCatalog) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut sectors = Vec::with_capacity(catalog.sectors.len());

        for mut sector in catalog.sectors {
            if !seen.insert(sector.code.clone()) {
                return Err(ConfigError::CatalogInvalid(format!(
                    "duplicate sector code {}",
                    sector.code
                )));
            }
            let mut members = HashSet::new();
            sector.instrument_codes.retain(|c| members.insert(c.clone()));
            sectors.push(sector);
        }

        Ok(Self {
            sectors,
            names: catalog.instrument_names,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let catalog: SectorCatalog = serde_json::from_str(json)?;
        Self::new(catalog)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            sectors = config.sectors.len(),
            "Loaded sector catalog"
        );
        Ok(config)
    }

    /// The built-in eight-sector theme catalog.
    pub fn builtin() -> Self {
        let sectors = BUILTIN_SECTORS
            .iter()
            .map(|(code, name, color, members)| SectorDefinition {
                code: SectorCode::new(*code),
                name: (*name).to_string(),
                color: (*color).to_string(),
                instrument_codes: members.iter().map(|c| InstrumentCode::new(*c)).collect(),
            })
            .collect();
        let names = BUILTIN_NAMES
            .iter()
            .map(|(code, name)| (InstrumentCode::new(*code), (*name).to_string()))
            .collect();
        Self { sectors, names }
    }
}

impl Default for StaticSectorConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SectorConfigProvider for StaticSectorConfig {
    fn list_sectors(&self) -> &[SectorDefinition] {
        &self.sectors
    }

    fn instrument_name(&self, instrument: &InstrumentCode) -> Option<&str> {
        self.names.get(instrument).map(String::as_str)
    }
}

type SectorRow = (&'static str, &'static str, &'static str, [&'static str; 10]);

const BUILTIN_SECTORS: [SectorRow; 8] = [
    (
        "SEMICONDUCTOR",
        "Semiconductor",
        "#4F46E5",
        [
            "005930", "000660", "402340", "042700", "000990", "058470", "036930", "403870",
            "357780", "240810",
        ],
    ),
    (
        "BATTERY",
        "Secondary Battery",
        "#10B981",
        [
            "373220", "006400", "051910", "086520", "247540", "003670", "005387", "012330",
            "096770", "064350",
        ],
    ),
    (
        "ROBOT",
        "Robotics/AI",
        "#F59E0B",
        [
            "267260", "336370", "090460", "443060", "377300", "035420", "298040", "281820",
            "078600", "042660",
        ],
    ),
    (
        "NUCLEAR",
        "Nuclear/SMR",
        "#EF4444",
        [
            "009540", "267260", "034020", "112610", "298040", "042660", "010120", "003490",
            "011790", "006260",
        ],
    ),
    (
        "SHIPBUILDING",
        "Shipbuilding",
        "#3B82F6",
        [
            "009540", "010140", "042660", "267250", "267260", "009830", "010620", "003280",
            "011200", "028670",
        ],
    ),
    (
        "DEFENSE",
        "Defense",
        "#8B5CF6",
        [
            "012450", "047810", "064350", "000880", "103140", "079550", "272210", "042660",
            "009540", "004490",
        ],
    ),
    (
        "BIO",
        "Bio/Healthcare",
        "#EC4899",
        [
            "207940", "068270", "326030", "091990", "128940", "006280", "000100", "302440",
            "145020", "950160",
        ],
    ),
    (
        "ENTERTAINMENT",
        "Entertainment/Media",
        "#F97316",
        [
            "352820", "041510", "122870", "035900", "035420", "035720", "068270", "053800",
            "293490", "263750",
        ],
    ),
];

const BUILTIN_NAMES: &[(&str, &str)] = &[
    ("005930", "Samsung Electronics"),
    ("000660", "SK hynix"),
    ("402340", "SK Square"),
    ("042700", "Hanmi Semiconductor"),
    ("000990", "DB HiTek"),
    ("058470", "Leeno Industrial"),
    ("036930", "Jusung Engineering"),
    ("403870", "HPSP"),
    ("357780", "Soulbrain"),
    ("240810", "Wonik IPS"),
    ("373220", "LG Energy Solution"),
    ("006400", "Samsung SDI"),
    ("051910", "LG Chem"),
    ("086520", "EcoPro"),
    ("247540", "EcoPro BM"),
    ("003670", "POSCO Future M"),
    ("005387", "Hyundai Motor 2nd Pref"),
    ("012330", "Hyundai Mobis"),
    ("096770", "SK Innovation"),
    ("064350", "Hyundai Rotem"),
    ("267260", "HD Hyundai Electric"),
    ("336370", "Saltlux"),
    ("090460", "BH"),
    ("443060", "Rainbow Robotics"),
    ("377300", "Kakao Pay"),
    ("035420", "NAVER"),
    ("298040", "Hyosung Heavy Industries"),
    ("281820", "KCTech"),
    ("078600", "Daejoo Electronic Materials"),
    ("042660", "Hanwha Ocean"),
    ("009540", "HD Korea Shipbuilding"),
    ("034020", "Doosan Enerbility"),
    ("112610", "CS Wind"),
    ("010120", "LS ELECTRIC"),
    ("003490", "Korean Air"),
    ("011790", "SKC"),
    ("006260", "LS"),
    ("010140", "Samsung Heavy Industries"),
    ("267250", "HD Hyundai"),
    ("009830", "Hanwha Solutions"),
    ("010620", "HD Hyundai Mipo"),
    ("003280", "Heung-A Shipping"),
    ("011200", "HMM"),
    ("028670", "Pan Ocean"),
    ("012450", "Hanwha Aerospace"),
    ("047810", "Korea Aerospace Industries"),
    ("000880", "Hanwha"),
    ("103140", "Poongsan"),
    ("079550", "LIG Nex1"),
    ("272210", "Hanwha Systems"),
    ("004490", "Sebang Global Battery"),
    ("207940", "Samsung Biologics"),
    ("068270", "Celltrion"),
    ("326030", "SK Biopharm"),
    ("091990", "Celltrion Healthcare"),
    ("128940", "Hanmi Pharm"),
    ("006280", "GC Biopharma"),
    ("000100", "Yuhan"),
    ("302440", "SK Bioscience"),
    ("145020", "Hugel"),
    ("950160", "Kolon TissueGene"),
    ("352820", "HYBE"),
    ("041510", "SM Entertainment"),
    ("122870", "YG Entertainment"),
    ("035900", "JYP Ent."),
    ("035720", "Kakao"),
    ("053800", "AhnLab"),
    ("293490", "Kakao Games"),
    ("263750", "Pearl Abyss"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_shape() {
        let config = StaticSectorConfig::builtin();
        let sectors = config.list_sectors();
        assert_eq!(sectors.len(), 8);
        assert!(sectors.iter().all(|s| s.instrument_codes.len() == 10));
        assert_eq!(sectors[0].code.as_str(), "SEMICONDUCTOR");
        assert_eq!(sectors[0].color, "#4F46E5");

        // Every member instrument has a display name.
        for code in config.distinct_instruments() {
            assert!(config.instrument_name(&code).is_some(), "no name for {}", code);
        }
    }

    #[test]
    fn test_sector_lookup() {
        let config = StaticSectorConfig::builtin();
        assert_eq!(config.sector("BIO").map(|s| s.color.as_str()), Some("#EC4899"));
        assert!(config.sector("NONEXISTENT").is_none());
    }

    #[test]
    fn test_from_json() {
        let config = StaticSectorConfig::from_json_str(
            r##"{
                "sectors": [
                    {"code": "A", "name": "Alpha", "color": "#000000",
                     "instrument_codes": ["000001", "000002", "000001"]}
                ],
                "instrument_names": {"000001": "One"}
            }"##,
        )
        .unwrap();

        let sector = config.sector("A").unwrap();
        assert_eq!(sector.instrument_codes.len(), 2);
        assert_eq!(
            config.instrument_name(&InstrumentCode::new("000001")),
            Some("One")
        );
        assert_eq!(config.instrument_name(&InstrumentCode::new("000002")), None);
    }

    #[test]
    fn test_json_codes_are_trimmed() {
        let config = StaticSectorConfig::from_json_str(
            r##"{
                "sectors": [
                    {"code": " A ", "name": "Alpha", "color": "#000000",
                     "instrument_codes": [" 005930", "005930 "]}
                ],
                "instrument_names": {" 005930 ": "Samsung Electronics"}
            }"##,
        )
        .unwrap();

        let sector = config.sector("A").unwrap();
        assert_eq!(sector.instrument_codes, vec![InstrumentCode::new("005930")]);
        assert_eq!(
            config.instrument_name(&InstrumentCode::new("005930")),
            Some("Samsung Electronics")
        );

        let blank = StaticSectorConfig::from_json_str(
            r##"{"sectors": [{"code": "A", "name": "x", "color": "#000", "instrument_codes": ["  "]}]}"##,
        );
        assert!(matches!(blank, Err(ConfigError::CatalogFormat(_))));
    }

    #[test]
    fn test_duplicate_sector_rejected() {
        let err = StaticSectorConfig::from_json_str(
            r##"{"sectors": [
                {"code": "A", "name": "x", "color": "#000", "instrument_codes": []},
                {"code": "A", "name": "y", "color": "#111", "instrument_codes": []}
            ]}"##,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::CatalogInvalid(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            StaticSectorConfig::from_json_str("{not json"),
            Err(ConfigError::CatalogFormat(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = StaticSectorConfig::from_path(Path::new("/nonexistent/sectors.json"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::CatalogIo { .. }));
    }
}
