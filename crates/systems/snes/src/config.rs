//! Sprite-location tables and tool settings.
//!
//! A sprite table maps ROM checksums and titles to known compressed sprite
//! offsets:
//!
//! ```json
//! {
//!   "games": {
//!     "KIRBY SUPER STAR": {
//!       "checksums": { "USA": "0x8A5C" },
//!       "sprites": {
//!         "_note": "keys starting with _ are comments",
//!         "kirby_normal": {
//!           "offset": "0x200000",
//!           "estimated_size": 8192,
//!           "offset_variants": { "USA": ["0x200100"] },
//!           "description": "Kirby standing"
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use hal_core::logging::{log, LogCategory, LogLevel};
use hal_core::ValidatorConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::ExtractConfig;
use crate::scan::ScanConfig;
use crate::ConfigError;

/// A known compressed sprite. Read-only input to scanning and extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpriteLocation {
    pub label: String,
    pub offset: usize,
    pub expected_size_bytes: Option<usize>,
    /// Alternative offsets for other releases, tried after `offset`
    #[serde(default)]
    pub offset_variants: Vec<usize>,
    #[serde(default)]
    pub description: String,
}

impl SpriteLocation {
    pub fn new(label: impl Into<String>, offset: usize) -> Self {
        Self {
            label: label.into(),
            offset,
            expected_size_bytes: None,
            offset_variants: Vec::new(),
            description: String::new(),
        }
    }

    /// Primary offset followed by the variants.
    pub fn candidates(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.offset).chain(self.offset_variants.iter().copied())
    }

    /// Check every candidate offset lies inside a ROM of `len` bytes.
    pub fn validate_against(&self, len: usize) -> Result<(), ConfigError> {
        match self.candidates().find(|&offset| offset >= len) {
            Some(offset) => Err(ConfigError::OffsetOutOfRange {
                label: self.label.clone(),
                offset,
                len,
            }),
            None => Ok(()),
        }
    }
}

/// Parse an offset given as `0x` hex, decimal text or a JSON integer.
pub fn parse_offset(field: &str, value: &Value) -> Result<usize, ConfigError> {
    let bad = || ConfigError::BadOffset {
        field: field.to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize).ok_or_else(bad),
        Value::String(s) => parse_offset_str(s).ok_or_else(bad),
        _ => Err(bad()),
    }
}

/// `0x1F00`, `0X1f00` or `7936`.
pub fn parse_offset_str(text: &str) -> Option<usize> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SpriteEntry {
    label: String,
    offset: usize,
    estimated_size: Option<usize>,
    description: String,
    /// Release name -> variant offsets
    variants: BTreeMap<String, Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GameEntry {
    name: String,
    /// Release name -> header checksum
    checksums: BTreeMap<String, u16>,
    sprites: Vec<SpriteEntry>,
}

/// Checksum/title -> sprite layout table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpriteTable {
    games: Vec<GameEntry>,
}

fn is_comment(key: &str) -> bool {
    key.starts_with('_')
}

fn entries(value: Option<&Value>) -> impl Iterator<Item = (&String, &Value)> {
    value
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter(|(key, _)| !is_comment(key))
}

impl SpriteTable {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let root: Value = serde_json::from_str(json)?;
        let mut games = Vec::new();

        for (name, game) in entries(root.get("games")) {
            let mut checksums = BTreeMap::new();
            for (version, value) in entries(game.get("checksums")) {
                let field = format!("{}.checksums.{}", name, version);
                let checksum = parse_offset(&field, value)?;
                let checksum = u16::try_from(checksum).map_err(|_| ConfigError::BadOffset {
                    field,
                    value: value.to_string(),
                })?;
                checksums.insert(version.clone(), checksum);
            }

            let mut sprites = Vec::new();
            for (label, sprite) in entries(game.get("sprites")) {
                let field = format!("{}.{}", name, label);
                let offset = parse_offset(
                    &format!("{}.offset", field),
                    sprite.get("offset").unwrap_or(&Value::Null),
                )?;

                let mut variants = BTreeMap::new();
                for (version, list) in entries(sprite.get("offset_variants")) {
                    let list_field = format!("{}.offset_variants.{}", field, version);
                    let offsets = list
                        .as_array()
                        .ok_or_else(|| ConfigError::BadOffset {
                            field: list_field.clone(),
                            value: list.to_string(),
                        })?
                        .iter()
                        .map(|v| parse_offset(&list_field, v))
                        .collect::<Result<Vec<_>, _>>()?;
                    variants.insert(version.clone(), offsets);
                }

                sprites.push(SpriteEntry {
                    label: label.clone(),
                    offset,
                    estimated_size: sprite
                        .get("estimated_size")
                        .and_then(Value::as_u64)
                        .map(|n| n as usize),
                    description: sprite
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    variants,
                });
            }

            games.push(GameEntry {
                name: name.clone(),
                checksums,
                sprites,
            });
        }

        log(LogCategory::Config, LogLevel::Info, || {
            format!("Config: loaded sprite table with {} game(s)", games.len())
        });
        Ok(Self { games })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    pub fn game_names(&self) -> impl Iterator<Item = &str> {
        self.games.iter().map(|game| game.name.as_str())
    }

    /// Sprite locations for a ROM, matched by checksum first and by title
    /// otherwise. Variants are only known for a checksum match.
    pub fn locations_for(&self, checksum: u16, title: &str) -> Vec<SpriteLocation> {
        let by_checksum = self.games.iter().find_map(|game| {
            game.checksums
                .iter()
                .find(|(_, &sum)| sum == checksum)
                .map(|(version, _)| (game, Some(version.as_str())))
        });

        let title_upper = title.to_uppercase();
        let title_matches = |game: &GameEntry| title_upper.contains(&game.name.to_uppercase());

        let (game, version) = match by_checksum {
            Some((game, version)) => {
                if !title_matches(game) {
                    log(LogCategory::Config, LogLevel::Warn, || {
                        format!(
                            "Config: checksum 0x{:04X} matches '{}' but title '{}' does not",
                            checksum, game.name, title
                        )
                    });
                }
                (game, version)
            }
            None => match self.games.iter().find(|game| title_matches(game)) {
                Some(game) => {
                    log(LogCategory::Config, LogLevel::Warn, || {
                        format!(
                            "Config: no checksum match for 0x{:04X}, using title match '{}'",
                            checksum, game.name
                        )
                    });
                    (game, None)
                }
                None => {
                    log(LogCategory::Config, LogLevel::Warn, || {
                        format!(
                            "Config: no sprite table entry for '{}' (checksum 0x{:04X})",
                            title, checksum
                        )
                    });
                    return Vec::new();
                }
            },
        };

        game.sprites
            .iter()
            .map(|sprite| SpriteLocation {
                label: sprite.label.clone(),
                offset: sprite.offset,
                expected_size_bytes: sprite.estimated_size,
                offset_variants: version
                    .and_then(|v| sprite.variants.get(v))
                    .cloned()
                    .unwrap_or_default(),
                description: sprite.description.clone(),
            })
            .collect()
    }
}

/// Tunables for every pipeline, stored as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scan: ScanConfig,
    pub validator: ValidatorConfig,
    pub extract: ExtractConfig,
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings, falling back to defaults when the file is missing or
    /// invalid.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log(LogCategory::Config, LogLevel::Warn, || {
                        format!(
                            "Config: failed to parse {}: {}. Using defaults.",
                            path.display(),
                            e
                        )
                    });
                    Self::default()
                }
            },
            Err(e) => {
                log(LogCategory::Config, LogLevel::Warn, || {
                    format!(
                        "Config: cannot read {}: {}. Using defaults.",
                        path.display(),
                        e
                    )
                });
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"{
        "_comment": "test table",
        "games": {
            "KIRBY SUPER STAR": {
                "checksums": { "USA": "0x8A5C", "JP": 4660 },
                "sprites": {
                    "_note": "offsets are file offsets",
                    "kirby_normal": {
                        "offset": "0x200000",
                        "estimated_size": 8192,
                        "offset_variants": { "USA": ["0x200100", "2097664"] },
                        "description": "Kirby standing"
                    },
                    "enemy_set": { "offset": 1048576 }
                }
            },
            "_unused": "comment"
        }
    }"#;

    #[test]
    fn test_parse_offset_forms() {
        assert_eq!(parse_offset_str("0x1F00"), Some(0x1F00));
        assert_eq!(parse_offset_str("0X1f00"), Some(0x1F00));
        assert_eq!(parse_offset_str(" 7936 "), Some(7936));
        assert_eq!(parse_offset_str("0xZZ"), None);
        assert_eq!(parse_offset_str("$1F00"), None);

        assert_eq!(parse_offset("o", &Value::from(42)).unwrap(), 42);
        assert!(matches!(
            parse_offset("o", &Value::from(-1)),
            Err(ConfigError::BadOffset { .. })
        ));
        assert!(matches!(
            parse_offset("o", &Value::Bool(true)),
            Err(ConfigError::BadOffset { .. })
        ));
    }

    #[test]
    fn test_checksum_match_includes_variants() {
        let table = SpriteTable::from_json(TABLE).unwrap();
        assert_eq!(table.game_names().collect::<Vec<_>>(), vec!["KIRBY SUPER STAR"]);

        let locations = table.locations_for(0x8A5C, "KIRBY SUPER STAR");
        assert_eq!(locations.len(), 2);
        let kirby = locations
            .iter()
            .find(|loc| loc.label == "kirby_normal")
            .unwrap();
        assert_eq!(kirby.offset, 0x200000);
        assert_eq!(kirby.expected_size_bytes, Some(8192));
        assert_eq!(kirby.offset_variants, vec![0x200100, 0x200200]);
        assert_eq!(kirby.description, "Kirby standing");
        assert_eq!(
            kirby.candidates().collect::<Vec<_>>(),
            vec![0x200000, 0x200100, 0x200200]
        );

        // Other release of the same game: same sprites, no variants
        let jp = table.locations_for(0x1234, "HOSHI NO KIRBY");
        assert!(jp.iter().all(|loc| loc.offset_variants.is_empty()));
        assert_eq!(jp.len(), 2);
    }

    #[test]
    fn test_title_fallback_and_no_match() {
        let table = SpriteTable::from_json(TABLE).unwrap();
        let locations = table.locations_for(0xFFFF, "kirby super star   ");
        assert_eq!(locations.len(), 2);
        assert!(locations.iter().all(|loc| loc.offset_variants.is_empty()));

        assert!(table.locations_for(0xFFFF, "SUPER METROID").is_empty());
    }

    #[test]
    fn test_bad_offsets_are_rejected() {
        let bad = r#"{"games": {"G": {"sprites": {"s": {"offset": "zz"}}}}}"#;
        match SpriteTable::from_json(bad) {
            Err(ConfigError::BadOffset { field, .. }) => assert_eq!(field, "G.s.offset"),
            other => panic!("unexpected {:?}", other),
        }

        let missing = r#"{"games": {"G": {"sprites": {"s": {}}}}}"#;
        assert!(matches!(
            SpriteTable::from_json(missing),
            Err(ConfigError::BadOffset { .. })
        ));

        let variant = r#"{"games": {"G": {"sprites": {"s": {"offset": 1, "offset_variants": {"v": "0x10"}}}}}}"#;
        assert!(matches!(
            SpriteTable::from_json(variant),
            Err(ConfigError::BadOffset { .. })
        ));

        assert!(matches!(
            SpriteTable::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_validate_against_rom_length() {
        let mut location = SpriteLocation::new("s", 0x100);
        location.offset_variants = vec![0x200, 0x9000];
        assert!(SpriteLocation::new("s", 0x100).validate_against(0x8000).is_ok());
        match location.validate_against(0x8000) {
            Err(ConfigError::OffsetOutOfRange { offset, .. }) => assert_eq!(offset, 0x9000),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_settings_partial_json_and_fallback() {
        let settings = Settings::from_json(r#"{"scan": {"step": 16}}"#).unwrap();
        assert_eq!(settings.scan.step, 16);
        assert_eq!(settings.validator, ValidatorConfig::default());
        assert_eq!(settings.extract, ExtractConfig::default());

        let missing = Settings::load_from(Path::new("/nonexistent/halsprite.json"));
        assert_eq!(missing, Settings::default());
    }

    #[test]
    fn test_settings_save_and_load() {
        let path = std::env::temp_dir().join(format!("halsprite_settings_{}.json", std::process::id()));
        let mut settings = Settings::default();
        settings.scan.step = 0x40;
        settings.validator.min_tiles = 8;
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), settings);

        fs::write(&path, "{ broken").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
        let _ = fs::remove_file(&path);
    }
}
