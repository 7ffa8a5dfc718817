//! Character catalog.
//!
//! Each character is a branded persona served on one or more domains with its
//! own prices and founders' circle size.

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, ConfigError, VerseResult};
use crate::tier::Tier;

/// A branded AI companion persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Stable key used in URLs and database rows (e.g. "lexi").
    pub key: String,
    pub display_name: String,
    /// Hostnames serving this character, lowercase, without port.
    #[serde(default)]
    pub domains: Vec<String>,
    pub premium_price_cents: i64,
    pub vip_price_cents: i64,
    /// Monthly premium price locked in for founders.
    pub founder_price_cents: i64,
    /// Seats available in the founders' circle.
    pub founder_seats: u32,
}

impl Character {
    /// Catalog price for a tier; free has no price.
    pub fn price_for(&self, tier: Tier) -> Option<i64> {
        match tier {
            Tier::Free => None,
            Tier::Premium => Some(self.premium_price_cents),
            Tier::Vip => Some(self.vip_price_cents),
        }
    }

    fn serves(&self, host: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(host))
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    default: String,
    characters: Vec<Character>,
}

/// All characters served by this deployment.
#[derive(Debug, Clone)]
pub struct CharacterCatalog {
    characters: Vec<Character>,
    default_key: String,
}

impl CharacterCatalog {
    /// Build a catalog, rejecting empty lists, duplicate keys and an unknown default.
    pub fn new(characters: Vec<Character>, default_key: impl Into<String>) -> VerseResult<Self> {
        let default_key = default_key.into();
        if characters.is_empty() {
            return Err(CatalogError::Empty.into());
        }
        for (i, c) in characters.iter().enumerate() {
            if characters[..i].iter().any(|other| other.key == c.key) {
                return Err(CatalogError::DuplicateCharacter { key: c.key.clone() }.into());
            }
        }
        if !characters.iter().any(|c| c.key == default_key) {
            return Err(CatalogError::UnknownCharacter { key: default_key }.into());
        }
        Ok(Self {
            characters,
            default_key,
        })
    }

    /// Parse a TOML catalog:
    ///
    /// ```toml
    /// default = "lexi"
    ///
    /// [[characters]]
    /// key = "lexi"
    /// displayName = "Lexi"
    /// domains = ["lexi.chat"]
    /// premiumPriceCents = 1299
    /// vipPriceCents = 2999
    /// founderPriceCents = 999
    /// founderSeats = 100
    /// ```
    pub fn from_toml(source: &str) -> VerseResult<Self> {
        let file: CatalogFile = toml::from_str(source).map_err(|e| ConfigError::InvalidValue {
            field: "characters".to_string(),
            value: "<toml>".to_string(),
            reason: e.to_string(),
        })?;
        Self::new(file.characters, file.default)
    }

    /// Catalog shipped with the binary.
    pub fn builtin() -> Self {
        let characters = vec![
            Character {
                key: "lexi".to_string(),
                display_name: "Lexi".to_string(),
                domains: vec!["lexi.chat".to_string(), "www.lexi.chat".to_string()],
                premium_price_cents: 1299,
                vip_price_cents: 2999,
                founder_price_cents: 999,
                founder_seats: 100,
            },
            Character {
                key: "nyx".to_string(),
                display_name: "Nyx".to_string(),
                domains: vec!["nyx.chat".to_string(), "www.nyx.chat".to_string()],
                premium_price_cents: 1499,
                vip_price_cents: 3499,
                founder_price_cents: 1099,
                founder_seats: 100,
            },
        ];
        Self {
            characters,
            default_key: "lexi".to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.key == key)
    }

    pub fn default_character(&self) -> &Character {
        self.get(&self.default_key)
            .unwrap_or(&self.characters[0])
    }

    /// Character serving a `Host` header value (port ignored).
    pub fn by_host(&self, host: &str) -> Option<&Character> {
        let host = host.split(':').next().unwrap_or(host).trim();
        self.characters.iter().find(|c| c.serves(host))
    }

    /// Pick the character for a request: explicit key, then host, then default.
    ///
    /// An explicit key that is not in the catalog is an error rather than a
    /// silent fallback.
    pub fn resolve(&self, explicit: Option<&str>, host: Option<&str>) -> VerseResult<&Character> {
        if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
            return self.get(key).ok_or_else(|| {
                CatalogError::UnknownCharacter {
                    key: key.to_string(),
                }
                .into()
            });
        }
        if let Some(character) = host.and_then(|h| self.by_host(h)) {
            return Ok(character);
        }
        Ok(self.default_character())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Character> {
        self.characters.iter()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerseError;

    #[test]
    fn test_builtin_catalog() {
        let catalog = CharacterCatalog::builtin();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.default_character().key, "lexi");
        assert_eq!(catalog.get("nyx").map(|c| c.founder_seats), Some(100));
    }

    #[test]
    fn test_resolve_precedence() {
        let catalog = CharacterCatalog::builtin();
        assert_eq!(catalog.resolve(Some("nyx"), Some("lexi.chat")).unwrap().key, "nyx");
        assert_eq!(catalog.resolve(None, Some("NYX.chat:443")).unwrap().key, "nyx");
        assert_eq!(catalog.resolve(Some("  "), Some("unknown.host")).unwrap().key, "lexi");
        assert!(matches!(
            catalog.resolve(Some("zed"), None),
            Err(VerseError::Catalog(CatalogError::UnknownCharacter { .. }))
        ));
    }

    #[test]
    fn test_price_for_tier() {
        let catalog = CharacterCatalog::builtin();
        let lexi = catalog.get("lexi").unwrap();
        assert_eq!(lexi.price_for(Tier::Free), None);
        assert_eq!(lexi.price_for(Tier::Premium), Some(1299));
        assert_eq!(lexi.price_for(Tier::Vip), Some(2999));
    }

    #[test]
    fn test_from_toml() {
        let source = r#"
            default = "ivy"

            [[characters]]
            key = "ivy"
            displayName = "Ivy"
            domains = ["ivy.chat"]
            premiumPriceCents = 999
            vipPriceCents = 1999
            founderPriceCents = 799
            founderSeats = 50
        "#;
        let catalog = CharacterCatalog::from_toml(source).unwrap();
        assert_eq!(catalog.default_character().display_name, "Ivy");
        assert_eq!(catalog.by_host("ivy.chat").map(|c| c.founder_seats), Some(50));
    }

    #[test]
    fn test_catalog_validation() {
        let lexi = CharacterCatalog::builtin().get("lexi").cloned().unwrap();
        assert!(matches!(
            CharacterCatalog::new(vec![], "lexi"),
            Err(VerseError::Catalog(CatalogError::Empty))
        ));
        assert!(matches!(
            CharacterCatalog::new(vec![lexi.clone(), lexi.clone()], "lexi"),
            Err(VerseError::Catalog(CatalogError::DuplicateCharacter { .. }))
        ));
        assert!(matches!(
            CharacterCatalog::new(vec![lexi], "nyx"),
            Err(VerseError::Catalog(CatalogError::UnknownCharacter { .. }))
        ));
        assert!(CharacterCatalog::from_toml("not = [valid").is_err());
    }
}
